//! Background cache warming from loaded documents.
//!
//! [`analyze`] extracts the catalog references of a document, and
//! [`PrefetchScheduler`] fetches them through [`CatalogCache`] under
//! throttling, concurrency and volume limits. Nothing here ever reports an
//! error to the caller; failures end up in the log and in [`PrefetchStats`].
//!
//! [`CatalogCache`]: crate::service::CatalogCache

pub mod lookup;
pub mod scheduler;

pub use lookup::{analyze, LookupContext, LookupItem, LookupKind};
pub use scheduler::{PrefetchScheduler, PrefetchStats};

use crate::backend::PersistentBackend;
use crate::catalog::CatalogResourceClient;

/// Anything that accepts lookups to warm later.
///
/// Lets read paths hand work to the scheduler without knowing its backend or
/// client types.
pub trait PrefetchSink: Send + Sync {
    /// Queue `item`. Must not block or fail.
    fn enqueue(&self, item: LookupItem);
}

impl<B: PersistentBackend, C: CatalogResourceClient> PrefetchSink for PrefetchScheduler<B, C> {
    fn enqueue(&self, item: LookupItem) {
        PrefetchScheduler::enqueue(self, item);
    }
}
