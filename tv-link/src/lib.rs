//! webOS TV link: SSAP transport, picture-control facade, pairing storage.

pub mod controller;
pub mod ssap;
pub mod store;

pub use controller::TvController;
pub use ssap::{
    NullSsapObserver, ResponseCallback, SsapClient, SsapError, SsapObserver, SsapResult,
};
pub use store::{StoredLink, TvLinkStore};
