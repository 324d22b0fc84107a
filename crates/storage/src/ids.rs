use std::fmt;
use std::str::FromStr;

use snafu::ResultExt;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, StorageError, StorageResult};

// Both identities share one shape; v7 keeps creation order visible in the raw text.
macro_rules! define_storage_id {
    ($(#[$meta:meta])* $name:ident, $id_type:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> StorageResult<Self> {
                let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
                    stage: "parse-storage-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            pub(crate) fn to_sql(self) -> String {
                self.0.as_hyphenated().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = StorageError;

            fn from_str(raw: &str) -> StorageResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_storage_id!(
    /// Identity of one persisted conversation.
    SessionId,
    "session-id"
);
define_storage_id!(
    /// Opaque message identity; the upsert key inside a session.
    MessageId,
    "message-id"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_survive_display_and_parse() {
        let session_id = SessionId::generate();
        let parsed: SessionId = session_id.to_string().parse().expect("valid uuid text");
        assert_eq!(parsed, session_id);
    }

    #[test]
    fn invalid_id_reports_its_type() {
        let error = MessageId::parse("not-a-uuid").expect_err("invalid uuid must fail");
        assert!(matches!(
            error,
            StorageError::InvalidId {
                id_type: "message-id",
                ..
            }
        ));
    }

    #[test]
    fn v7_ids_are_unique() {
        let first = MessageId::generate();
        let second = MessageId::generate();
        assert_ne!(first, second);
    }
}
