use std::time::Duration;

/// Magic value opening every connect-channel message.
pub const CONNECT_MAGIC: u32 = 0x4647_4154; // 'FGAT'
/// Current connect-channel protocol version.
pub const CONNECT_VERSION: u8 = 1;

/// Connect-channel message types.
pub const MSG_TYPE_CONNECT: u8 = 1;
pub const MSG_TYPE_DETACH: u8 = 2;

/// Maximum length of a client working-directory path.
pub const PATH_LEN: usize = 1024;
/// Header bytes in front of the path area of a connect message.
pub const CONNECT_HEADER_SIZE: usize = 16;
/// Fixed size of a connect-channel message. Stays below `PIPE_BUF` so
/// concurrent writers never interleave.
pub const CONNECT_FRAME_SIZE: usize = CONNECT_HEADER_SIZE + PATH_LEN;

/// Payload capacity of one response/request frame.
pub const PAYLOAD_LEN: usize = 5 * 1024;
/// Frame header: status i32 + payload length u32.
pub const FRAME_HEADER_SIZE: usize = 8;
/// Fixed size of a frame on the wire.
pub const FRAME_SIZE: usize = FRAME_HEADER_SIZE + PAYLOAD_LEN;

/// Frame status codes.
pub const STATUS_CONTINUE: i32 = 0;
pub const STATUS_OK: i32 = 1;

/// Situation sentinel: no free slot, retry (Blocking) or abort (TryOnce).
pub const SITUATION_FULL: i32 = -1;
/// Situation sentinel: the server will never admit this request.
pub const SITUATION_REJECTED: i32 = -2;

/// Copy buffer used by upload/download.
pub const COPY_CHUNK: usize = 4096;

/// Default admission limits.
pub const DEFAULT_MAX_CLIENTS: usize = 8;
pub const WAIT_QUEUE_CAPACITY: usize = 100;
pub const MAX_FILES: usize = 100;

/// Default channel namespace.
pub const DEFAULT_CHANNEL_DIR: &str = "/tmp";
/// Default log destination of the server binary.
pub const LOG_FILE_NAME: &str = "server_log.txt";

/// Length of one suspension slice in blocking waits.
pub const DEFAULT_POLL_SLICE: Duration = Duration::from_millis(50);
/// Slice used while waiting on registry locks.
pub const LOCK_WAIT_SLICE: Duration = Duration::from_millis(20);

/// Channel suffixes.
pub const CHANNEL_C2S_SUFFIX: &str = "C2S";
pub const CHANNEL_S2C_SUFFIX: &str = "S2C";
pub const SIGNAL_REQUEST_SUFFIX: &str = "REQ";
pub const SIGNAL_REPLY_SUFFIX: &str = "REP";

/// Final payload of a graceful disconnect.
pub const QUIT_PAYLOAD: &str = "quit";
