use crate::contracts::{LockMode, SequenceError, DEFAULT_SEQUENCE_NAME};

/// Largest range a single call may reserve. The range is committed before
/// the values are materialized, so an unbounded size could reserve values
/// the caller never receives.
pub const MAX_RANGE_SIZE: u64 = 1_000_000;

/// Parameters of a single-value allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextValue {
    pub name: String,
    /// Value returned by the first call, and the value a reset wraps back to.
    pub initial_value: i64,
    /// When set, a value reaching this threshold wraps back to `initial_value`.
    pub reset_value: Option<i64>,
    pub nowait: bool,
}

impl Default for NextValue {
    fn default() -> Self {
        Self {
            name: DEFAULT_SEQUENCE_NAME.to_string(),
            initial_value: 1,
            reset_value: None,
            nowait: false,
        }
    }
}

impl NextValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn initial_value(mut self, initial_value: i64) -> Self {
        self.initial_value = initial_value;
        self
    }

    pub fn reset_value(mut self, reset_value: i64) -> Self {
        self.reset_value = Some(reset_value);
        self
    }

    pub fn nowait(mut self, nowait: bool) -> Self {
        self.nowait = nowait;
        self
    }

    pub fn lock_mode(&self) -> LockMode {
        LockMode::from_nowait(self.nowait)
    }

    /// Checks `initial_value < reset_value`.
    pub fn validate(&self) -> Result<(), SequenceError> {
        match self.reset_value {
            Some(reset) if reset <= self.initial_value => Err(SequenceError::InvalidResetValue {
                initial: self.initial_value,
                reset,
            }),
            _ => Ok(()),
        }
    }
}

/// Parameters of a range allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextValues {
    pub size: u64,
    pub name: String,
    pub initial_value: i64,
    pub nowait: bool,
}

impl NextValues {
    pub fn new(size: u64, name: impl Into<String>) -> Self {
        Self {
            size,
            name: name.into(),
            initial_value: 1,
            nowait: false,
        }
    }

    /// A range request against the default sequence.
    pub fn of(size: u64) -> Self {
        Self::new(size, DEFAULT_SEQUENCE_NAME)
    }

    pub fn initial_value(mut self, initial_value: i64) -> Self {
        self.initial_value = initial_value;
        self
    }

    pub fn nowait(mut self, nowait: bool) -> Self {
        self.nowait = nowait;
        self
    }

    pub fn lock_mode(&self) -> LockMode {
        LockMode::from_nowait(self.nowait)
    }

    /// Returns the size as a signed delta, rejecting zero and sizes above [`MAX_RANGE_SIZE`].
    pub fn delta(&self) -> Result<i64, SequenceError> {
        if self.size == 0 || self.size > MAX_RANGE_SIZE {
            return Err(SequenceError::InvalidRangeSize(self.size));
        }
        i64::try_from(self.size).map_err(|_| SequenceError::InvalidRangeSize(self.size))
    }
}
