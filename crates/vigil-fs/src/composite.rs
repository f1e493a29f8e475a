//! Provider that merges several underlying providers.

use std::{collections::HashSet, sync::Arc};

use vigil_token::{ChangeToken, CompositeChangeToken, NoopChangeToken};

use crate::{DirectoryContents, FileInfo, FileProvider};

/// Merges an ordered sequence of [`FileProvider`]s into one.
///
/// Lookups are answered by the first provider that has the entry, directory listings are
/// concatenated with earlier providers winning name collisions and watch subscriptions fan
/// out to every provider, aggregated under a [`CompositeChangeToken`].
pub struct CompositeFileProvider {
    providers: Vec<Arc<dyn FileProvider>>,
}
impl CompositeFileProvider {
    /// New provider over `providers`, in precedence order.
    pub fn new(providers: Vec<Arc<dyn FileProvider>>) -> Self {
        Self { providers }
    }

    /// The merged providers.
    pub fn providers(&self) -> &[Arc<dyn FileProvider>] {
        &self.providers
    }
}
impl FileProvider for CompositeFileProvider {
    fn get_file_info(&self, subpath: &str) -> FileInfo {
        for provider in &self.providers {
            let info = provider.get_file_info(subpath);
            if info.exists {
                return info;
            }
        }
        FileInfo::not_found(subpath.rsplit(['/', '\\']).next().unwrap_or(subpath))
    }

    fn get_directory_contents(&self, subpath: &str) -> DirectoryContents {
        let mut contents = DirectoryContents::not_found();
        let mut seen = HashSet::new();
        for provider in &self.providers {
            let dir = provider.get_directory_contents(subpath);
            if !dir.exists {
                continue;
            }
            contents.exists = true;
            for entry in dir {
                // first provider wins the name
                if seen.insert(entry.name.clone()) {
                    contents.entries.push(entry);
                }
            }
        }
        contents
    }

    fn watch(&self, filter: &str) -> Arc<dyn ChangeToken> {
        let tokens: Vec<Arc<dyn ChangeToken>> = self
            .providers
            .iter()
            .map(|p| p.watch(filter))
            .filter(|t| t.active_callbacks())
            .collect();

        if tokens.is_empty() {
            NoopChangeToken::shared()
        } else {
            Arc::new(CompositeChangeToken::new(tokens))
        }
    }
}
