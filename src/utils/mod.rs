mod handle;
mod ring;

pub use handle::{Handle, Pool};
pub use ring::RingIndex;
