//! Local changes applied after a remote call has succeeded.
//!
//! Nothing is changed before the call resolves; a failed call leaves the
//! collection exactly as it was and yields a [`SyncError`]. Deleting an item
//! does not move the loader's cursor, so the next page may repeat or skip one
//! item depending on server ordering.

use crate::error::SyncError;
use crate::loader::Loader;
use crate::source::PageSource;
use splitdebt_core::models::{Debt, Identified, Placement};
use std::future::Future;

pub enum Mutation<T> {
    /// Edit a single field of the item with `id` in place.
    Patch { id: String, patch: fn(&mut T) },
    Remove { id: String },
    Insert { item: T, at: Placement },
    /// Swap in the server's representation of an item.
    Replace { item: T },
}

impl<T: Identified> Mutation<T> {
    /// Insert at the collection's usual spot for new items.
    pub fn insert(item: T) -> Self {
        Mutation::Insert {
            item,
            at: T::NEW_ITEM_PLACEMENT,
        }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Mutation::Remove { id: id.into() }
    }

    pub fn replace(item: T) -> Self {
        Mutation::Replace { item }
    }

    /// Returns whether anything changed.
    pub fn apply_to(self, items: &mut Vec<T>) -> bool {
        match self {
            Mutation::Patch { id, patch } => match items.iter_mut().find(|i| i.id() == id) {
                Some(item) => {
                    patch(item);
                    true
                }
                None => false,
            },
            Mutation::Remove { id } => {
                let before = items.len();
                items.retain(|i| i.id() != id);
                items.len() != before
            }
            Mutation::Insert { item, at } => {
                // already arrived with a page
                if let Some(existing) = items.iter_mut().find(|i| i.id() == item.id()) {
                    *existing = item;
                    return true;
                }
                match at {
                    Placement::Front => items.insert(0, item),
                    Placement::Back => items.push(item),
                }
                true
            }
            Mutation::Replace { item } => match items.iter_mut().find(|i| i.id() == item.id()) {
                Some(existing) => {
                    *existing = item;
                    true
                }
                None => false,
            },
        }
    }
}

impl Mutation<Debt> {
    pub fn mark_sent(id: impl Into<String>) -> Self {
        Mutation::Patch {
            id: id.into(),
            patch: |debt: &mut Debt| debt.is_sent = true,
        }
    }

    pub fn mark_confirmed(id: impl Into<String>) -> Self {
        Mutation::Patch {
            id: id.into(),
            patch: |debt: &mut Debt| debt.is_confirmed = true,
        }
    }
}

/// Awaits `remote` and, only if it succeeded, applies the mutation built from
/// its result to `loader`. When `target` is given, a second change to the same
/// item is refused while the first is outstanding.
pub async fn apply_on_success<S, R, Fut, M>(
    loader: &Loader<S>,
    target: Option<&str>,
    remote: Fut,
    into_mutation: M,
    failure_message: &str,
) -> Result<R, SyncError>
where
    S: PageSource,
    Fut: Future<Output = anyhow::Result<R>>,
    M: FnOnce(&R) -> Mutation<S::Item>,
{
    let generation = match target {
        Some(id) => loader
            .begin_mutation(id)
            .ok_or_else(|| SyncError::Busy(id.to_string()))?,
        None => loader.generation(),
    };
    let result = remote.await;
    if let Some(id) = target {
        loader.end_mutation(generation, id);
    }

    match result {
        Ok(value) => {
            let applied = loader.apply(generation, into_mutation(&value));
            tracing::info!(
                collection = loader.source().collection(),
                item_id = target.unwrap_or("-"),
                applied,
                "remote change applied"
            );
            Ok(value)
        }
        Err(err) => {
            let message = api::error_message(&err, failure_message);
            tracing::warn!(
                collection = loader.source().collection(),
                item_id = target.unwrap_or("-"),
                error = %err,
                "remote change failed"
            );
            Err(SyncError::Mutation {
                message,
                item_id: target.map(str::to_string),
            })
        }
    }
}

/// Create on the server, then place the returned item locally.
pub async fn create<S, Fut>(loader: &Loader<S>, remote: Fut) -> Result<S::Item, SyncError>
where
    S: PageSource,
    Fut: Future<Output = anyhow::Result<S::Item>>,
{
    apply_on_success(
        loader,
        None,
        remote,
        |item: &S::Item| Mutation::insert(item.clone()),
        "Не удалось создать запись",
    )
    .await
}

/// Update on the server, then replace the local item with the response.
pub async fn update<S, Fut>(
    loader: &Loader<S>,
    id: &str,
    remote: Fut,
) -> Result<S::Item, SyncError>
where
    S: PageSource,
    Fut: Future<Output = anyhow::Result<S::Item>>,
{
    apply_on_success(
        loader,
        Some(id),
        remote,
        |item: &S::Item| Mutation::replace(item.clone()),
        "Не удалось сохранить изменения",
    )
    .await
}

/// Delete on the server, then drop the local item. The cursor stays put.
pub async fn delete<S, Fut>(loader: &Loader<S>, id: &str, remote: Fut) -> Result<(), SyncError>
where
    S: PageSource,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let owned = id.to_string();
    apply_on_success(
        loader,
        Some(id),
        remote,
        move |_: &()| Mutation::remove(owned),
        "Не удалось удалить запись",
    )
    .await
}
