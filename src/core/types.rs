use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use serde::{Serialize, Deserialize};
use crate::core::utils::{b36, parse_b36};
use crate::core::error::Result;

/// Dense position of a message in the metadata log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MsgIdx(pub u64);

impl MsgIdx {
    pub fn new(idx: u64) -> Self {
        MsgIdx(idx)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn to_b36(&self) -> String {
        b36(self.0)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(MsgIdx(parse_b36(text)?))
    }
}

impl From<u64> for MsgIdx {
    fn from(idx: u64) -> Self {
        MsgIdx(idx)
    }
}

impl From<usize> for MsgIdx {
    fn from(idx: usize) -> Self {
        MsgIdx(idx as u64)
    }
}

impl fmt::Display for MsgIdx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "={}", self.to_b36())
    }
}

/// Cooperative cancellation shared between a long-running task and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
