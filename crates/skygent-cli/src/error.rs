//! CLI error taxonomy, exit codes and the JSON error envelope.

use serde_json::json;
use skygent_core::error_chain;
use skygent_filter::{DslParseError, FilterCompileError, FilterLibraryError};
use skygent_store::{StoreError, StoreManagerError};
use skygent_sync::{DerivationError, SyncError, SyncStage};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("{message}"))]
    Input { message: String },
    #[snafu(display("Configuration error: {message}"))]
    Config { message: String },
    #[snafu(transparent)]
    Manager { source: StoreManagerError },
    #[snafu(transparent)]
    Store { source: StoreError },
    #[snafu(transparent)]
    FilterParse { source: DslParseError },
    #[snafu(transparent)]
    FilterCompile { source: FilterCompileError },
    #[snafu(transparent)]
    FilterEval {
        source: skygent_filter::FilterEvalError,
    },
    #[snafu(transparent)]
    Sync { source: SyncError },
    #[snafu(transparent)]
    Derivation { source: DerivationError },
    #[snafu(display("I/O error"))]
    Io { source: std::io::Error },
    #[snafu(display("Malformed JSON"))]
    Json { source: serde_json::Error },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

impl CliError {
    pub fn input(message: impl Into<String>) -> Self {
        CliError::Input {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        CliError::Config {
            message: message.into(),
        }
    }

    /// Stable machine tag for the envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::Input { .. } => "CliInputError",
            CliError::Config { .. } => "ConfigError",
            CliError::Manager {
                source: StoreManagerError::StoreNotFound { .. },
            } => "StoreNotFound",
            CliError::Manager {
                source: StoreManagerError::StoreAlreadyExists { .. },
            } => "StoreAlreadyExists",
            CliError::Store {
                source: StoreError::EffectfulQueryFilter { .. },
            } => "FilterEvalError",
            CliError::Manager { .. } | CliError::Store { .. } => "StoreIoError",
            CliError::FilterParse {
                source: DslParseError::Library { .. },
            } => "FilterNotFound",
            CliError::FilterParse { .. } => "FilterCompileError",
            CliError::FilterCompile { .. } => "FilterCompileError",
            CliError::FilterEval { .. } => "FilterEvalError",
            CliError::Sync { source } => match source.stage() {
                SyncStage::Source => "BskyError",
                SyncStage::Parse => "SyncError",
                SyncStage::Filter => "FilterEvalError",
                SyncStage::Store => "StoreIoError",
            },
            CliError::Derivation { .. } => "DerivationError",
            CliError::Io { .. } => "StoreIoError",
            CliError::Json { .. } => "CliJsonError",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Input { .. } | CliError::Config { .. } | CliError::Json { .. } => 2,
            CliError::Manager {
                source: StoreManagerError::StoreNotFound { .. },
            } => 3,
            CliError::Manager {
                source: StoreManagerError::StoreAlreadyExists { .. },
            } => 2,
            CliError::Store {
                source: StoreError::EffectfulQueryFilter { .. },
            } => 8,
            CliError::Manager { .. } | CliError::Store { .. } | CliError::Io { .. } => 7,
            CliError::FilterParse {
                source: DslParseError::Library { .. },
            } => 2,
            CliError::FilterParse { .. }
            | CliError::FilterCompile { .. }
            | CliError::FilterEval { .. } => 8,
            CliError::Sync { source } => match source.stage() {
                SyncStage::Source => 5,
                SyncStage::Parse => 1,
                SyncStage::Filter => 8,
                SyncStage::Store => 7,
            },
            CliError::Derivation { .. } => 2,
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            CliError::Manager {
                source: StoreManagerError::StoreNotFound { name },
            } => Some(format!("create it first: skygent store create {name}")),
            CliError::FilterParse {
                source:
                    DslParseError::Library {
                        source: FilterLibraryError::NotFound { name },
                    },
            } => Some(format!("save it first: skygent filter save {name} '<expr>'")),
            CliError::Derivation {
                source: DerivationError::EventTimeIncompatible,
            } => Some("re-run with --mode derive-time".to_owned()),
            _ => None,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            CliError::FilterParse {
                source: DslParseError::Syntax { source },
            } => serde_json::to_value(source).ok(),
            _ => None,
        }
    }

    /// The envelope emitted when `SKYGENT_JSON_ERRORS` is set.
    pub fn envelope(&self) -> serde_json::Value {
        let mut error = json!({
            "type": self.kind(),
            "code": self.kind(),
            "exitCode": self.exit_code(),
            "message": error_chain(self),
        });
        if let Some(suggestion) = self.suggestion() {
            error["suggestion"] = json!(suggestion);
        }
        if let Some(details) = self.details() {
            error["details"] = details;
        }
        json!({ "error": error })
    }
}

pub fn json_errors_enabled() -> bool {
    matches!(
        std::env::var("SKYGENT_JSON_ERRORS").as_deref(),
        Ok("1") | Ok("true")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_contract()  {
        assert_eq!(CliError::input("bad flag").exit_code(), 2);
        assert_eq!(
            CliError::Manager {
                source: StoreManagerError::StoreNotFound {
                    name: "demo".parse().unwrap()
                }
            }
            .exit_code(),
            3
        );
        assert_eq!(
            CliError::FilterCompile {
                source: FilterCompileError {
                    path: "regex".into(),
                    message: "bad".into()
                }
            }
            .exit_code(),
            8
        );
    }

    #[test]
    fn envelope_shape() {
        let envelope = CliError::input("oops").envelope();
        assert_eq!(envelope["error"]["type"], "CliInputError");
        assert_eq!(envelope["error"]["exitCode"], 2);
        assert_eq!(envelope["error"]["message"], "oops");
    }
}
