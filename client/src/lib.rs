//! The Seek downloader: a download engine that turns ranked search results into
//! verified files on disk, plus the batch driver, status reporter, scheduler and CLI
//! around it.

pub mod batch;
pub mod cli;
pub mod downloader;
pub mod reporter;
pub mod schedule;
pub mod storage;
pub mod tags;
