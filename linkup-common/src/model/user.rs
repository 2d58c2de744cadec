use crate::model::Id;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;

pub const USER_NAME_MAX_LEN: usize = 50;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

/// Denormalized author identity as the feed displays it. A [`User`] embedded
/// in a post or comment is always fully hydrated; the normalizer drops
/// events it cannot hydrate rather than emitting a bare foreign key.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub name: UserName,
    pub avatar: Option<MediaPath>,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct UserName(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The user name is invalid: {0}")]
pub struct InvalidUserNameError(String);

impl UserName {
    pub fn new(name: String) -> Result<Self, InvalidUserNameError> {
        if !name.is_empty() && name.chars().count() <= USER_NAME_MAX_LEN {
            Ok(UserName(name))
        } else {
            Err(InvalidUserNameError(name))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for UserName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        UserName::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"UserName"))
    }
}

/// Opaque path of an object in the platform's public storage bucket, e.g.
/// `postImages/1714650000000.png`. Only the client crate turns this into a
/// fetchable URL.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct MediaPath(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The media path is invalid: {0}")]
pub struct InvalidMediaPathError(String);

impl MediaPath {
    pub fn new(path: String) -> Result<Self, InvalidMediaPathError> {
        let well_formed = !path.is_empty()
            && !path.starts_with('/')
            && !path.contains("://")
            && path.split('/').all(|segment| segment != "..");

        if well_formed {
            Ok(MediaPath(path))
        } else {
            Err(InvalidMediaPathError(path))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for MediaPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        MediaPath::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"MediaPath"))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::user::{MediaPath, UserName};

    #[test]
    fn user_name_validation() {
        assert!(UserName::new("Ada".to_owned()).is_ok());
        assert!(UserName::new("a".repeat(50)).is_ok());

        assert!(UserName::new(String::new()).is_err());
        assert!(UserName::new("a".repeat(51)).is_err());
    }

    #[test]
    fn media_path_validation() {
        assert!(MediaPath::new("postImages/1714650000000.png".to_owned()).is_ok());
        assert!(MediaPath::new("profiles/avatar.jpg".to_owned()).is_ok());

        assert!(MediaPath::new(String::new()).is_err());
        assert!(MediaPath::new("/absolute/path.png".to_owned()).is_err());
        assert!(MediaPath::new("https://elsewhere.example/x.png".to_owned()).is_err());
        assert!(MediaPath::new("postImages/../secrets".to_owned()).is_err());
    }
}
