//! The value vocabulary of call evaluation.

use shrike_common::{ShrikeError, ShrikeResult};

use crate::bitmap::Bitmap;
use crate::pairs::Pair;

/// One call's result. Read calls yield a bitmap, count, or pair list; bit
/// mutations yield the changed flag; attribute writes yield `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Bitmap(Bitmap),
    Count(u64),
    Changed(bool),
    Pairs(Vec<Pair>),
    None,
}

impl QueryResult {
    pub fn into_bitmap(self) -> ShrikeResult<Bitmap> {
        match self {
            QueryResult::Bitmap(bm) => Ok(bm),
            other => Err(unexpected("bitmap", &other)),
        }
    }

    pub fn into_count(self) -> ShrikeResult<u64> {
        match self {
            QueryResult::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }

    pub fn into_changed(self) -> ShrikeResult<bool> {
        match self {
            QueryResult::Changed(changed) => Ok(changed),
            other => Err(unexpected("changed flag", &other)),
        }
    }

    pub fn into_pairs(self) -> ShrikeResult<Vec<Pair>> {
        match self {
            QueryResult::Pairs(pairs) => Ok(pairs),
            other => Err(unexpected("pairs", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &QueryResult) -> ShrikeError {
    ShrikeError::Internal(format!("expected {} result, got {:?}", wanted, got))
}

impl From<Bitmap> for QueryResult {
    fn from(bm: Bitmap) -> Self {
        QueryResult::Bitmap(bm)
    }
}

impl From<u64> for QueryResult {
    fn from(n: u64) -> Self {
        QueryResult::Count(n)
    }
}

impl From<bool> for QueryResult {
    fn from(changed: bool) -> Self {
        QueryResult::Changed(changed)
    }
}

impl From<Vec<Pair>> for QueryResult {
    fn from(pairs: Vec<Pair>) -> Self {
        QueryResult::Pairs(pairs)
    }
}

impl TryFrom<QueryResult> for Bitmap {
    type Error = ShrikeError;

    fn try_from(value: QueryResult) -> ShrikeResult<Self> {
        value.into_bitmap()
    }
}

impl TryFrom<QueryResult> for u64 {
    type Error = ShrikeError;

    fn try_from(value: QueryResult) -> ShrikeResult<Self> {
        value.into_count()
    }
}

impl TryFrom<QueryResult> for bool {
    type Error = ShrikeError;

    fn try_from(value: QueryResult) -> ShrikeResult<Self> {
        value.into_changed()
    }
}

impl TryFrom<QueryResult> for Vec<Pair> {
    type Error = ShrikeError;

    fn try_from(value: QueryResult) -> ShrikeResult<Self> {
        value.into_pairs()
    }
}
