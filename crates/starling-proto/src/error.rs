#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("binary frame length {0} is not a multiple of the record size")]
    MalformedFrame(usize),
}
