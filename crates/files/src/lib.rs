//! File operations over the `files` WebSocket protocol: one JSON request in,
//! one JSON reply out. Successful writes by a known actor are audited and
//! versioned in the store.

pub mod path;
pub mod protocol;
pub mod service;

pub use {
    path::clean_path,
    protocol::{
        DecodeError, DirStats, DiskReport, EntryInfo, FileRequest, FileResponse, RequestData,
        ResponseData, decode_request,
    },
    service::{FileOpError, FileService, mode_string},
};
