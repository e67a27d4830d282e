//! Portal content: the catalogue, material trees, videostores, and files.
//!
//! Every listing is fetched lazily and cached on the element that owns it.
//! Clones of an element share its cache, so a [`Material`] handed to another
//! task does not refetch its assignments.

mod catalog;
mod file;
mod material;
pub mod paths;
mod videostore;

pub use catalog::VideostoreCategory;
pub use file::{FileKind, Naming, RemoteFile, SaveOutcome, ServerMetadata, server_filename};
pub use material::{Assignment, Child, Folder, Material};
pub use videostore::{LegacyParams, LessonInfo, Videostore, VideostoreSource};

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::PortalError;

/// Lazily filled listing shared between clones of its owner.
#[derive(Debug)]
pub(crate) struct Cached<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Cached<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Cached<T> {
    /// Returns the cached items, running `fetch` when `force_update` is set
    /// or nothing is cached yet.
    ///
    /// The lock is held while fetching so concurrent callers share one fetch.
    pub(crate) async fn get_or_fetch<F, Fut>(
        &self,
        force_update: bool,
        fetch: F,
    ) -> Result<Vec<T>, PortalError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, PortalError>>,
    {
        let mut items = self.items.lock().await;
        if force_update || items.is_empty() {
            *items = fetch().await?;
        }
        Ok(items.clone())
    }
}

/// Inserts `item` keyed by `key`: a later item with the same key replaces the
/// earlier one in place.
pub(crate) fn insert_keyed<T>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> &str) {
    let new_key = key(&item).to_string();
    match items.iter().position(|existing| key(existing) == new_key) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}
