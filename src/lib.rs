pub use binrw;
pub use snafu;

mod brw_utils;
pub mod crypto;
pub mod filesystem;
pub mod formats;
mod hexstring;
pub mod ids;
pub mod storage;

pub use hexstring::HexData;
