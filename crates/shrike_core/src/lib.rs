//! In-memory index model for ShrikeDB: bitmaps, fragments, frames, indexes,
//! and the holder registry the executor evaluates against.
//!
//! The executor treats everything here as a capability: `Fragment` for row
//! reads / bit mutations / top-N, attribute stores for row and column
//! attributes, `Holder` for lookup. Storage is a single-process in-memory
//! rendition; durability is a concern of a different layer.

pub mod attr_store;
pub mod bitmap;
pub mod fragment;
pub mod frame;
pub mod holder;
pub mod index;
pub mod pairs;
pub mod result;
pub mod view;

pub use attr_store::AttrStore;
pub use bitmap::Bitmap;
pub use fragment::{Fragment, TopOptions};
pub use frame::{Frame, FrameOptions};
pub use holder::Holder;
pub use index::{Index, IndexOptions};
pub use pairs::Pair;
pub use result::QueryResult;
pub use view::{TimeQuantum, VIEW_INVERSE, VIEW_STANDARD};
