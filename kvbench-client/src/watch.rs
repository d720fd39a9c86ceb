use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::Revision;

/// The kind of change a [`WatchEvent`] reports.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum EventKind {
    /// The key was created or updated.
    #[default]
    Put,
    /// The key was deleted.
    Delete,
}

/// A single change notification delivered by a watch subscription.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WatchEvent {
    /// What happened to the key.
    pub kind: EventKind,
    /// The changed key.
    pub key: Bytes,
    /// The value after the change; empty for deletions.
    pub value: Bytes,
    /// The revision at which the change happened.
    pub mod_revision: Revision,
}

/// The type of [`Stream`](futures_util::Stream) returned by a watch subscription.
///
/// Every item is one change event. The stream is infinite: it only yields `None` after it
/// has yielded an error.
pub type WatchStream = BoxStream<'static, crate::Result<WatchEvent>>;
