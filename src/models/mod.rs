use tokio::io::AsyncRead;

/// Byte stream of a single file part.
pub type PartReader = Box<dyn AsyncRead + Send + Unpin>;

/// One file stream handed to a batch by the part source.
pub struct IncomingPart {
    /// Form field the file arrived under.
    pub field_name: String,
    /// Filename as sent by the client, before sanitizing.
    pub file_name: String,
    pub reader: PartReader,
}

impl IncomingPart {
    pub fn new(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            reader: Box::new(reader),
        }
    }
}

impl std::fmt::Debug for IncomingPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingPart")
            .field("field_name", &self.field_name)
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}
