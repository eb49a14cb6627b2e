//! TFTP (Trivial File Transfer Protocol) server for bootgate
//!
//! A read-only TFTP implementation serving content resolved through the
//! bootgate route table:
//! - Read requests (RRQ) in netascii, octet and mail modes
//! - Option negotiation (RFC 2347) with block size (RFC 2348), timeout and
//!   transfer size (RFC 2349), and window size (RFC 7440, answered as 1)
//! - One session task and one ephemeral socket per request
//! - Retransmission with a bounded retry budget
//! - Live switch from an HTTP origin to a freshly mirrored local file
//!
//! # Protocol Organization
//!
//! - [`TftpOpcode`] - Packet opcodes
//! - [`TftpErrorCode`] - Standard error codes with default messages
//! - [`TransferMode`] - Transfer modes with validation
//! - [`TransferOptions`] - Option negotiation and OACK contents
//! - [`TftpRequest`] - Parsed and buildable read requests
//!
//! # Working with Protocol Types
//!
//! ```rust
//! use tftp::{TftpOpcode, TftpRequest, TransferMode, TransferOptions, parse_rrq};
//!
//! let mut request = TftpRequest::read_request("boot/pxelinux.0", TransferMode::Octet);
//! request.with_option("blksize", "1468").with_option("tsize", "0");
//!
//! let packet = request.to_bytes();
//! assert_eq!(tftp::get_tftp_opcode(&packet), Some(TftpOpcode::ReadRequest));
//!
//! let parsed = parse_rrq(&packet).unwrap();
//! let options = TransferOptions::negotiate(&parsed.options);
//! assert_eq!(options.blksize, 1468);
//! assert_eq!(options.oack(4096)[1], ("tsize", "4096".to_string()));
//! ```

mod protocol;
mod server;
mod transfer;

pub use protocol::*;
pub use server::*;
pub use transfer::*;
