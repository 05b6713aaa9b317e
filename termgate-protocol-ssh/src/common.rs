use bytes::Bytes;

pub const TERM_TYPE: &str = "xterm-256color";
pub const INITIAL_COLS: u32 = 120;
pub const INITIAL_ROWS: u32 = 30;

#[derive(Clone, Debug)]
pub struct PtyRequest {
    pub term: String,
    pub col_width: u32,
    pub row_height: u32,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: TERM_TYPE.to_owned(),
            col_width: INITIAL_COLS,
            row_height: INITIAL_ROWS,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ChannelOperation {
    Data(Bytes),
    ResizePty { col_width: u32, row_height: u32 },
    Close,
}
