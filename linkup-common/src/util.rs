use thiserror::Error;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct PageLimit(u32);

impl PageLimit {
    #[must_use]
    pub fn new(limit: u32) -> Option<Self> {
        (limit > 0).then_some(Self(limit))
    }

    #[must_use]
    pub fn new_unchecked(limit: u32) -> Self {
        Self::new(limit).expect("Page limit was zero.")
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The page limit must be positive")]
pub struct ZeroPageLimitError;

impl TryFrom<u32> for PageLimit {
    type Error = ZeroPageLimitError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(ZeroPageLimitError)
    }
}
