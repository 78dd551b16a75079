pub mod batch;
pub mod cleanup;
pub mod temp_name;
pub mod upload;
