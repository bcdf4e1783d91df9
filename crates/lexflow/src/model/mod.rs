//! Domain records persisted by the pipeline.
//!
//! Status-like columns are stored as lowercase strings; each enum here
//! round-trips through `as_str` / `FromStr`.

use chrono::{DateTime, SecondsFormat, Utc};

/// Declares a string-backed enum with `as_str`, `FromStr`, `Display` and
/// serde in the same lowercase form.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    )),
                }
            }
        }
    };
}

pub(crate) use string_enum;

pub mod action;
pub mod document;
pub mod finding;
pub mod run;

pub use action::{ActionStatus, ActionType, PipelineAction};
pub use document::{DocumentRecord, Matter};
pub use finding::{FindingStatus, Impact, PipelineFinding};
pub use run::{PipelineRun, RunStatus, StageStatus, StageStatusKind};

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
