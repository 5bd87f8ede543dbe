use clap::ValueEnum;
use serde::Deserialize;

/// Hash verification policy applied after a file transfer completes.
#[derive(ValueEnum, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Verify only when a hash is known for the request.
    #[default]
    Auto,
    /// Every file transfer must carry a hash.
    On,
    Off,
}
