//! TFTP Protocol Implementation
//!
//! Packet parsing and building for the read side of TFTP (RFC 1350) and its
//! option extensions: option negotiation (RFC 2347), block size (RFC 2348),
//! timeout and transfer size (RFC 2349) and window size (RFC 7440).
//!
//! # Packet Formats
//!
//! ```text
//! RRQ    | 1 | filename | 0 | mode | 0 | opt1 | 0 | value1 | 0 | ...
//! DATA   | 3 | block# | data
//! ACK    | 4 | block#
//! ERROR  | 5 | code | message | 0
//! OACK   | 6 | opt1 | 0 | value1 | 0 | ...
//! ```
//!
//! All integers are 16-bit big endian.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow};

/// TFTP Protocol Opcodes
///
/// These opcodes identify the type of TFTP packet being sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpOpcode {
    /// Read Request (RRQ) - Opcode 1
    ///
    /// Client requests to read a file. Contains filename, transfer mode and
    /// optional extension parameters.
    ReadRequest = 1,

    /// Write Request (WRQ) - Opcode 2
    ///
    /// Recognized on the wire but always refused; this server is read-only.
    WriteRequest = 2,

    /// Data Packet (DATA) - Opcode 3
    ///
    /// A block of file data. The last packet of a transfer carries fewer
    /// bytes than the negotiated block size, possibly none.
    Data = 3,

    /// Acknowledgment (ACK) - Opcode 4
    ///
    /// Acknowledges a data packet. Block number 0 acknowledges an OACK.
    Acknowledgment = 4,

    /// Error Packet (ERROR) - Opcode 5
    ///
    /// Reports an error condition and terminates the transfer.
    Error = 5,

    /// Option Acknowledgment (OACK) - Opcode 6
    ///
    /// Lists the options the server accepted, with their effective values.
    OptionAck = 6,
}

impl TftpOpcode {
    /// Convert a u16 value to a TftpOpcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::from_u16(1), Some(TftpOpcode::ReadRequest));
    /// assert_eq!(TftpOpcode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            6 => Some(Self::OptionAck),
            _ => None,
        }
    }

    /// Convert the opcode to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the human-readable name of the opcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::OptionAck.name(), "OACK");
    /// assert_eq!(TftpOpcode::Data.name(), "DATA");
    /// ```
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::WriteRequest => "WRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
            Self::OptionAck => "OACK",
        }
    }
}

impl From<TftpOpcode> for u16 {
    fn from(opcode: TftpOpcode) -> Self {
        opcode.as_u16()
    }
}

impl fmt::Display for TftpOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP Error Codes (RFC 1350)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpErrorCode {
    /// Error code 0: Not defined, see the message
    NotDefined = 0,

    /// Error code 1: File not found
    ///
    /// Sent whenever route resolution fails, whatever the underlying cause.
    FileNotFound = 1,

    /// Error code 2: Access violation
    AccessViolation = 2,

    /// Error code 3: Disk full or allocation exceeded
    DiskFull = 3,

    /// Error code 4: Illegal TFTP operation
    ///
    /// Wrong request type, unknown transfer mode or unexpected packet.
    IllegalOperation = 4,

    /// Error code 5: Unknown transfer ID
    UnknownTransferId = 5,

    /// Error code 6: File already exists
    FileAlreadyExists = 6,

    /// Error code 7: No such user
    NoSuchUser = 7,
}

impl TftpErrorCode {
    /// Convert a u16 value to a TftpErrorCode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::from_u16(1), Some(TftpErrorCode::FileNotFound));
    /// assert_eq!(TftpErrorCode::from_u16(8), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::NotDefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    /// Convert the error code to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the default error message for this error code
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::FileNotFound.default_message(), "file not found");
    /// assert_eq!(TftpErrorCode::IllegalOperation.default_message(), "illegal TFTP operation");
    /// ```
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotDefined => "not defined",
            Self::FileNotFound => "file not found",
            Self::AccessViolation => "access violation",
            Self::DiskFull => "disk full or allocation exceeded",
            Self::IllegalOperation => "illegal TFTP operation",
            Self::UnknownTransferId => "unknown transfer ID",
            Self::FileAlreadyExists => "file already exists",
            Self::NoSuchUser => "no such user",
        }
    }
}

impl From<TftpErrorCode> for u16 {
    fn from(error_code: TftpErrorCode) -> Self {
        error_code.as_u16()
    }
}

impl fmt::Display for TftpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// TFTP Transfer Modes
///
/// Content is always sent as stored; the mode is validated but no newline
/// translation is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Text mode, mode string "netascii"
    NetAscii,

    /// Binary mode, mode string "octet"
    Octet,

    /// Obsolete mail delivery mode, mode string "mail"
    Mail,
}

impl TransferMode {
    /// Parse a transfer mode from a string
    ///
    /// The comparison is case-insensitive.
    ///
    /// # Examples
    /// ```
    /// use tftp::TransferMode;
    ///
    /// assert_eq!("octet".parse::<TransferMode>(), Ok(TransferMode::Octet));
    /// assert_eq!("NETASCII".parse::<TransferMode>(), Ok(TransferMode::NetAscii));
    /// assert_eq!("Mail".parse::<TransferMode>(), Ok(TransferMode::Mail));
    /// assert!("binary".parse::<TransferMode>().is_err());
    /// ```
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "netascii" => Some(Self::NetAscii),
            "octet" => Some(Self::Octet),
            "mail" => Some(Self::Mail),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetAscii => "netascii",
            Self::Octet => "octet",
            Self::Mail => "mail",
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_opt(s).ok_or_else(|| format!("unknown transfer mode: {s}"))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options this server understands; anything else in a request is ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpOption {
    /// `blksize` (RFC 2348)
    BlockSize,
    /// `timeout` (RFC 2349)
    Timeout,
    /// `tsize` (RFC 2349)
    TransferSize,
    /// `windowsize` (RFC 7440)
    WindowSize,
}

impl TftpOption {
    /// Look up an option by its (case-insensitive) wire name
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOption;
    ///
    /// assert_eq!(TftpOption::from_name("BLKSIZE"), Some(TftpOption::BlockSize));
    /// assert_eq!(TftpOption::from_name("multicast"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "blksize" => Some(Self::BlockSize),
            "timeout" => Some(Self::Timeout),
            "tsize" => Some(Self::TransferSize),
            "windowsize" => Some(Self::WindowSize),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::BlockSize => "blksize",
            Self::Timeout => "timeout",
            Self::TransferSize => "tsize",
            Self::WindowSize => "windowsize",
        }
    }
}

/// Parameters of a transfer after option negotiation
///
/// Invalid option values fall back to defaults and are left out of the
/// OACK. The order in which options were requested is kept for the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Negotiated block size in bytes
    pub blksize: usize,
    /// Wait for each acknowledgment
    pub timeout: Duration,
    /// Window size requested by the client; transfers stay lockstep
    pub windowsize: Option<u16>,
    accepted: Vec<TftpOption>,
}

impl TransferOptions {
    /// Default block size (RFC 1350)
    pub const DEFAULT_BLKSIZE: usize = 512;
    /// Smallest block size accepted (RFC 2348)
    pub const MIN_BLKSIZE: usize = 8;
    /// Largest block size accepted (RFC 2348)
    pub const MAX_BLKSIZE: usize = 65464;
    /// Timeout used when none is negotiated
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Negotiate the options of a read request
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use tftp::TransferOptions;
    ///
    /// let requested = vec![
    ///     ("blksize".to_string(), "1024".to_string()),
    ///     ("timeout".to_string(), "300".to_string()),
    /// ];
    /// let options = TransferOptions::negotiate(&requested);
    /// assert_eq!(options.blksize, 1024);
    /// assert_eq!(options.timeout, Duration::from_secs(5)); // out of range
    /// ```
    pub fn negotiate(requested: &[(String, String)]) -> Self {
        let mut options = Self::default();
        for (name, value) in requested {
            let Some(option) = TftpOption::from_name(name) else {
                continue;
            };
            let value = value.trim();
            let accepted = match option {
                TftpOption::BlockSize => match value.parse::<usize>() {
                    Ok(n) if (Self::MIN_BLKSIZE..=Self::MAX_BLKSIZE).contains(&n) => {
                        options.blksize = n;
                        true
                    }
                    _ => {
                        options.blksize = Self::DEFAULT_BLKSIZE;
                        false
                    }
                },
                TftpOption::Timeout => match value.parse::<u64>() {
                    Ok(n) if (1..=255).contains(&n) => {
                        options.timeout = Duration::from_secs(n);
                        true
                    }
                    _ => {
                        options.timeout = Self::DEFAULT_TIMEOUT;
                        false
                    }
                },
                TftpOption::TransferSize => true,
                TftpOption::WindowSize => match value.parse::<u16>() {
                    Ok(n) if n >= 1 => {
                        options.windowsize = Some(n);
                        true
                    }
                    _ => {
                        options.windowsize = None;
                        false
                    }
                },
            };
            options.accepted.retain(|o| *o != option);
            if accepted {
                options.accepted.push(option);
            }
        }
        options
    }

    /// Whether an OACK must be sent before the first data block
    pub fn wants_oack(&self) -> bool {
        !self.accepted.is_empty()
    }

    /// Accepted options with their effective values, in request order.
    ///
    /// `tsize` reports the resolved size; `windowsize` is always answered
    /// with 1 since blocks are sent one at a time.
    pub fn oack(&self, tsize: u64) -> Vec<(&'static str, String)> {
        self.accepted
            .iter()
            .map(|option| {
                let value = match option {
                    TftpOption::BlockSize => self.blksize.to_string(),
                    TftpOption::Timeout => self.timeout.as_secs().to_string(),
                    TftpOption::TransferSize => tsize.to_string(),
                    TftpOption::WindowSize => "1".to_string(),
                };
                (option.name(), value)
            })
            .collect()
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            blksize: Self::DEFAULT_BLKSIZE,
            timeout: Self::DEFAULT_TIMEOUT,
            windowsize: None,
            accepted: Vec::new(),
        }
    }
}

/// Parsed read request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpRequest {
    /// Requested filename, as sent
    pub filename: String,
    /// Transfer mode string, lowercased; may be invalid
    pub mode: String,
    /// Recognized options in request order, names lowercased
    pub options: Vec<(String, String)>,
}

impl TftpRequest {
    /// Create a new read request
    ///
    /// # Examples
    /// ```
    /// use tftp::{TftpRequest, TransferMode};
    ///
    /// let mut request = TftpRequest::read_request("boot.img", TransferMode::Octet);
    /// request.with_option("blksize", "1400");
    /// assert_eq!(request.transfer_mode(), Some(TransferMode::Octet));
    /// assert_eq!(request.options, vec![("blksize".to_string(), "1400".to_string())]);
    /// ```
    pub fn read_request(filename: impl Into<String>, mode: TransferMode) -> Self {
        Self {
            filename: filename.into(),
            mode: mode.as_str().to_string(),
            options: Vec::new(),
        }
    }

    /// Add an option to the request
    pub fn with_option(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.options.push((key.into(), value.into()));
        self
    }

    pub fn transfer_mode(&self) -> Option<TransferMode> {
        TransferMode::from_str_opt(&self.mode)
    }

    /// Encode as an RRQ packet
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(64);
        v.extend_from_slice(&TftpOpcode::ReadRequest.as_u16().to_be_bytes());
        for field in [self.filename.as_str(), self.mode.as_str()] {
            v.extend_from_slice(field.as_bytes());
            v.push(0);
        }
        push_options(&mut v, &self.options);
        v
    }
}

fn push_options<K: AsRef<str>, V: AsRef<str>>(v: &mut Vec<u8>, options: &[(K, V)]) {
    for (key, val) in options {
        v.extend_from_slice(key.as_ref().as_bytes());
        v.push(0);
        v.extend_from_slice(val.as_ref().as_bytes());
        v.push(0);
    }
}

/// Find the next null byte in a buffer starting from a given position
pub fn find_zero(buf: &[u8], start: usize) -> Option<usize> {
    buf.get(start..)?.iter().position(|&b| b == 0).map(|pos| start + pos)
}

/// Split a null-separated field list, tolerating a missing final terminator
fn fields(buf: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        let end = find_zero(buf, i).unwrap_or(buf.len());
        out.push(String::from_utf8_lossy(&buf[i..end]).into_owned());
        i = end + 1;
    }
    out
}

/// Parse a TFTP Read Request (RRQ) packet
///
/// A missing filename or mode yields an empty string. Unrecognized options
/// and options without a value are dropped; a repeated option keeps its
/// last value.
pub fn parse_rrq(buf: &[u8]) -> Result<TftpRequest> {
    if get_tftp_opcode(buf) != Some(TftpOpcode::ReadRequest) {
        return Err(anyhow!("Not an RRQ packet"));
    }

    let mut fields = fields(&buf[2..]).into_iter();
    let filename = fields.next().unwrap_or_default();
    let mode = fields.next().unwrap_or_default().to_ascii_lowercase();

    let mut options: Vec<(String, String)> = Vec::new();
    while let (Some(name), Some(value)) = (fields.next(), fields.next()) {
        if TftpOption::from_name(&name).is_none() {
            continue;
        }
        let name = name.to_ascii_lowercase();
        options.retain(|(n, _)| *n != name);
        options.push((name, value));
    }

    Ok(TftpRequest {
        filename,
        mode,
        options,
    })
}

/// Parse a TFTP ACK packet
pub fn parse_ack(buf: &[u8]) -> Result<u16> {
    if buf.len() < 4 {
        return Err(anyhow!("ACK too short"));
    }
    if get_tftp_opcode(buf) != Some(TftpOpcode::Acknowledgment) {
        return Err(anyhow!("Not an ACK packet"));
    }

    Ok(u16::from_be_bytes([buf[2], buf[3]]))
}

/// Parse a TFTP DATA packet into its block number and payload
pub fn parse_data(buf: &[u8]) -> Result<(u16, &[u8])> {
    if buf.len() < 4 {
        return Err(anyhow!("DATA too short"));
    }
    if get_tftp_opcode(buf) != Some(TftpOpcode::Data) {
        return Err(anyhow!("Not a DATA packet"));
    }

    Ok((u16::from_be_bytes([buf[2], buf[3]]), &buf[4..]))
}

/// Parse a TFTP Error packet
pub fn parse_error(buf: &[u8]) -> Result<(u16, String)> {
    if buf.len() < 4 {
        return Err(anyhow!("Error packet too short"));
    }
    if get_tftp_opcode(buf) != Some(TftpOpcode::Error) {
        return Err(anyhow!("Not an Error packet"));
    }

    let code = u16::from_be_bytes([buf[2], buf[3]]);
    let msg_bytes = &buf[4..];
    let end = msg_bytes.iter().position(|&b| b == 0).unwrap_or(msg_bytes.len());
    let message = String::from_utf8_lossy(&msg_bytes[..end]).into_owned();

    Ok((code, message))
}

/// Parse a TFTP OACK packet into its option pairs
pub fn parse_oack(buf: &[u8]) -> Result<Vec<(String, String)>> {
    if get_tftp_opcode(buf) != Some(TftpOpcode::OptionAck) {
        return Err(anyhow!("Not an OACK packet"));
    }

    let mut fields = fields(&buf[2..]).into_iter();
    let mut options = Vec::new();
    while let (Some(name), Some(value)) = (fields.next(), fields.next()) {
        options.push((name.to_ascii_lowercase(), value));
    }
    Ok(options)
}

/// Build a TFTP Data packet
pub fn build_data(block: u16, data: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + data.len());
    v.extend_from_slice(&TftpOpcode::Data.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v.extend_from_slice(data);
    v
}

/// Build a TFTP ACK packet
pub fn build_ack(block: u16) -> Vec<u8> {
    let mut v = Vec::with_capacity(4);
    v.extend_from_slice(&TftpOpcode::Acknowledgment.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v
}

/// Build a TFTP Error packet
pub fn build_error(code: TftpErrorCode, msg: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + msg.len() + 1);
    v.extend_from_slice(&TftpOpcode::Error.as_u16().to_be_bytes());
    v.extend_from_slice(&code.as_u16().to_be_bytes());
    v.extend_from_slice(msg.as_bytes());
    v.push(0);
    v
}

/// Build a TFTP OACK (Option Acknowledgment) packet
pub fn build_oack<K: AsRef<str>, V: AsRef<str>>(opts: &[(K, V)]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&TftpOpcode::OptionAck.as_u16().to_be_bytes());
    push_options(&mut v, opts);
    v
}

/// Get the opcode from a TFTP packet
pub fn get_opcode(buf: &[u8]) -> Option<u16> {
    if buf.len() >= 2 {
        Some(u16::from_be_bytes([buf[0], buf[1]]))
    } else {
        None
    }
}

/// Get the TFTP opcode enum from a packet buffer
pub fn get_tftp_opcode(buf: &[u8]) -> Option<TftpOpcode> {
    get_opcode(buf).and_then(TftpOpcode::from_u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requested(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_tftp_opcode_conversion() {
        assert_eq!(TftpOpcode::from_u16(6), Some(TftpOpcode::OptionAck));
        assert_eq!(TftpOpcode::from_u16(0), None);
        assert_eq!(u16::from(TftpOpcode::Error), 5);
        assert_eq!(TftpOpcode::Acknowledgment.to_string(), "ACK");
    }

    #[test]
    fn test_tftp_error_code_conversion() {
        for code in 0..=7 {
            assert_eq!(TftpErrorCode::from_u16(code).unwrap().as_u16(), code);
        }
        assert_eq!(TftpErrorCode::FileNotFound.to_string(), "file not found (1)");
    }

    #[test]
    fn test_transfer_mode() {
        assert_eq!(TransferMode::from_str_opt("OCTET"), Some(TransferMode::Octet));
        assert_eq!(TransferMode::from_str_opt("mail"), Some(TransferMode::Mail));
        assert_eq!(TransferMode::from_str_opt(""), None);
        assert_eq!(TransferMode::NetAscii.to_string(), "netascii");
    }

    #[test]
    fn test_negotiate_defaults() {
        let options = TransferOptions::negotiate(&[]);
        assert_eq!(options.blksize, 512);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert!(!options.wants_oack());
        assert!(options.oack(100).is_empty());
    }

    #[test]
    fn test_negotiate_blksize_bounds() {
        for (value, expected) in [("8", 8), ("65464", 65464), ("1468", 1468)] {
            let options = TransferOptions::negotiate(&requested(&[("blksize", value)]));
            assert_eq!(options.blksize, expected);
            assert_eq!(options.oack(0), vec![("blksize", expected.to_string())]);
        }
        for value in ["7", "65465", "0", "-1", "big"] {
            let options = TransferOptions::negotiate(&requested(&[("blksize", value)]));
            assert_eq!(options.blksize, 512, "{value}");
            assert!(!options.wants_oack(), "{value}");
        }
    }

    #[test]
    fn test_negotiate_timeout_bounds() {
        let options = TransferOptions::negotiate(&requested(&[("timeout", "1")]));
        assert_eq!(options.timeout, Duration::from_secs(1));
        let options = TransferOptions::negotiate(&requested(&[("timeout", "255")]));
        assert_eq!(options.oack(0), vec![("timeout", "255".to_string())]);

        let options = TransferOptions::negotiate(&requested(&[("timeout", "256")]));
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert!(!options.wants_oack());
    }

    #[test]
    fn test_oack_reports_tsize_and_windowsize() {
        let options = TransferOptions::negotiate(&requested(&[
            ("tsize", "0"),
            ("windowsize", "16"),
            ("blksize", "1024"),
        ]));
        assert_eq!(options.windowsize, Some(16));
        assert_eq!(
            options.oack(1_048_576),
            vec![
                ("tsize", "1048576".to_string()),
                ("windowsize", "1".to_string()),
                ("blksize", "1024".to_string()),
            ]
        );

        let options = TransferOptions::negotiate(&requested(&[("windowsize", "0")]));
        assert!(!options.wants_oack());
    }

    #[test]
    fn test_find_zero() {
        let buf = b"abc\0def\0";
        assert_eq!(find_zero(buf, 0), Some(3));
        assert_eq!(find_zero(buf, 4), Some(7));
        assert_eq!(find_zero(buf, 8), None);
        assert_eq!(find_zero(buf, 20), None);
    }

    #[test]
    fn test_parse_rrq_basic() {
        let packet = b"\x00\x01boot/pxelinux.0\x00OCTET\x00";
        let request = parse_rrq(packet).unwrap();
        assert_eq!(request.filename, "boot/pxelinux.0");
        assert_eq!(request.mode, "octet");
        assert_eq!(request.transfer_mode(), Some(TransferMode::Octet));
        assert!(request.options.is_empty());
    }

    #[test]
    fn test_parse_rrq_with_options() {
        let packet = b"\x00\x01f\x00octet\x00BLKSIZE\x001024\x00multicast\x00\x00tsize\x000\x00blksize\x002048\x00";
        let request = parse_rrq(packet).unwrap();
        assert_eq!(request.options, requested(&[("tsize", "0"), ("blksize", "2048")]));
    }

    #[test]
    fn test_parse_rrq_tolerates_truncation() {
        let request = parse_rrq(b"\x00\x01file").unwrap();
        assert_eq!(request.filename, "file");
        assert_eq!(request.mode, "");
        assert_eq!(request.transfer_mode(), None);

        let request = parse_rrq(b"\x00\x01").unwrap();
        assert_eq!(request.filename, "");

        // Option without a value is dropped
        let request = parse_rrq(b"\x00\x01f\x00octet\x00tsize\x00").unwrap();
        assert!(request.options.is_empty());

        assert!(parse_rrq(b"\x00\x02f\x00octet\x00").is_err());
    }

    #[test]
    fn test_request_to_bytes() {
        let mut request = TftpRequest::read_request("a.bin", TransferMode::Octet);
        request.with_option("blksize", "16384").with_option("tsize", "0");
        let bytes = request.to_bytes();
        assert_eq!(&bytes[..], b"\x00\x01a.bin\x00octet\x00blksize\x0016384\x00tsize\x000\x00");
        assert_eq!(parse_rrq(&bytes).unwrap(), request);
    }

    #[test]
    fn test_build_data() {
        let packet = build_data(0x0102, b"xyz");
        assert_eq!(packet, vec![0, 3, 1, 2, b'x', b'y', b'z']);
        assert_eq!(parse_data(&packet).unwrap(), (0x0102, &b"xyz"[..]));
        assert_eq!(build_data(7, &[]), vec![0, 3, 0, 7]);
    }

    #[test]
    fn test_build_ack() {
        assert_eq!(build_ack(0), vec![0, 4, 0, 0]);
        assert_eq!(parse_ack(&build_ack(65535)).unwrap(), 65535);
        assert!(parse_ack(&[0, 4, 0]).is_err());
        assert!(parse_ack(&[0, 3, 0, 1]).is_err());
    }

    #[test]
    fn test_build_error() {
        let packet = build_error(TftpErrorCode::IllegalOperation, "read requests only");
        assert_eq!(&packet[..4], &[0, 5, 0, 4]);
        assert_eq!(*packet.last().unwrap(), 0);
        assert_eq!(parse_error(&packet).unwrap(), (4, "read requests only".to_string()));
    }

    #[test]
    fn test_build_oack() {
        let packet = build_oack(&[("blksize", "1024"), ("tsize", "2048")]);
        assert_eq!(&packet[..], b"\x00\x06blksize\x001024\x00tsize\x002048\x00");
        assert_eq!(
            parse_oack(&packet).unwrap(),
            requested(&[("blksize", "1024"), ("tsize", "2048")])
        );
    }

    #[test]
    fn test_parse_error_without_terminator() {
        assert_eq!(parse_error(b"\x00\x05\x00\x01gone").unwrap(), (1, "gone".to_string()));
        assert_eq!(parse_error(b"\x00\x05\x00\x00").unwrap(), (0, String::new()));
    }

    #[test]
    fn test_get_opcode() {
        assert_eq!(get_opcode(&[0, 4, 0, 1]), Some(4));
        assert_eq!(get_opcode(&[0]), None);
        assert_eq!(get_tftp_opcode(&[0, 9]), None);
        assert_eq!(get_tftp_opcode(&[0, 1]), Some(TftpOpcode::ReadRequest));
    }
}
