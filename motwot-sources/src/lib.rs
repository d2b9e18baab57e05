//! Upstream sources of MOT history archives.
//!
//! [`mot_history::MotHistorySource`] downloads the archives published by the MOT history trade
//! API. Archives already on disk are served by [`motwot_etl::source::local::LocalArchiveSource`].

pub mod mot_history;
