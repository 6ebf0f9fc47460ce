use starling_proto::Slot;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("no node occupies slot {0}")]
    InvalidSlot(Slot),

    #[error("setting {setting} rejected: {value} is outside {min}..={max}")]
    ValidationFailed {
        setting: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("unknown setting {0}")]
    UnknownSetting(String),
}
