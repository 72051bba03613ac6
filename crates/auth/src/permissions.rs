use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use calth_core::{DomainError, DomainResult};

/// Permission action key (e.g. `"roles-update"`).
///
/// Keys are opaque: the engine compares them for equality against the
/// `action_key` column of granted permissions and attaches no meaning to the
/// text. A key is never empty and carries no surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionKey(Cow<'static, str>);

impl ActionKey {
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("action key must not be empty"));
        }
        Ok(Self(Cow::Owned(trimmed.to_owned())))
    }

    /// Build a key from a literal known at compile time.
    ///
    /// The literal is trusted to be non-empty and trimmed; route tables use
    /// this to declare their requirements.
    pub const fn from_static(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ActionKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ActionKey> for String {
    fn from(value: ActionKey) -> Self {
        value.0.into_owned()
    }
}

/// How a set of required keys is combined.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityMode {
    /// Every key must be granted.
    #[default]
    All,
    /// At least one key must be granted.
    Any,
}

/// A non-empty, ordered, de-duplicated set of action keys plus a mode.
///
/// There is no way to construct an empty requirement, so a guard can never
/// be configured to allow everything by accident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredCapabilities {
    keys: Vec<ActionKey>,
    mode: CapabilityMode,
}

impl RequiredCapabilities {
    pub fn new(
        keys: impl IntoIterator<Item = ActionKey>,
        mode: CapabilityMode,
    ) -> DomainResult<Self> {
        let mut unique: Vec<ActionKey> = Vec::new();
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        if unique.is_empty() {
            return Err(DomainError::validation(
                "at least one required action key must be given",
            ));
        }
        Ok(Self { keys: unique, mode })
    }

    pub fn all(keys: impl IntoIterator<Item = ActionKey>) -> DomainResult<Self> {
        Self::new(keys, CapabilityMode::All)
    }

    pub fn any(keys: impl IntoIterator<Item = ActionKey>) -> DomainResult<Self> {
        Self::new(keys, CapabilityMode::Any)
    }

    pub fn single(key: ActionKey) -> Self {
        Self {
            keys: vec![key],
            mode: CapabilityMode::All,
        }
    }

    pub fn keys(&self) -> &[ActionKey] {
        &self.keys
    }

    pub fn mode(&self) -> CapabilityMode {
        self.mode
    }
}

impl core::fmt::Display for RequiredCapabilities {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sep = match self.mode {
            CapabilityMode::All => " & ",
            CapabilityMode::Any => " | ",
        };
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(sep)?;
            }
            f.write_str(key.as_str())?;
        }
        Ok(())
    }
}
