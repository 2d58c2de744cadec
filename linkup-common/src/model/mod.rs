pub mod notification;
pub mod post;
pub mod user;

use crate::{
    model::user::{InvalidMediaPathError, InvalidUserNameError},
    util::ZeroPageLimitError,
};
use derive_where::derive_where;
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    UserName(#[from] InvalidUserNameError),
    #[error(transparent)]
    MediaPath(#[from] InvalidMediaPathError),
    #[error(transparent)]
    ZeroPageLimit(#[from] ZeroPageLimitError),
}

/// Opaque, source-assigned identifier. The backend mints these; the client
/// only carries them around, so there is no local generator.
#[derive_where(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Debug,
    Default,
    Hash,
    Serialize,
    Deserialize
)]
#[serde(transparent)]
pub struct Id<Marker>(u64, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw, PhantomData)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.get()
    }
}
