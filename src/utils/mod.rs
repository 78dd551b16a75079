pub mod hash;
pub mod url;
pub mod validation;
