//! MemOSD wire format
//!
//! Everything that crosses a socket lives here:
//! - Message framing: a fixed header with CRC32C over both payload regions
//! - The composite op request and its v7 reply envelope
//! - The 64-byte tagged op struct shared by requests and replies
//! - Monitor messages and the cluster map
//!
//! All integers are little-endian. Variable structs carry a version byte
//! and a declared length, so decoders skip unknown tail fields of newer
//! peers and reject structs that lie about their length.

pub mod decode;
pub mod message;
pub mod messenger;
pub mod mon;
pub mod op;
pub mod osdmap;
pub mod reply;
pub mod request;

pub use message::{HEADER_SIZE, MAX_DATA_LEN, MAX_FRONT_LEN, Message, MessageHeader, msg_type};
pub use messenger::{read_message, write_message};
pub use op::{
    MAX_OPS, MAX_SNAPS, OP_FLAG_FAILOK, OSD_OP_SIZE, AllocHint, ClassCall, CopyFromInfo, Extent,
    Op, OpPayload, WatchInfo, XattrInfo, opcode,
};
pub use osdmap::ClusterMap;
pub use reply::{OpReply, REPLY_VERSION, encode_reply};
pub use request::{
    FLAG_ACK, FLAG_ONDISK, FLAG_ONNVRAM, FLAG_READ, FLAG_WRITE, OpRequest, REQUEST_VERSION,
};
