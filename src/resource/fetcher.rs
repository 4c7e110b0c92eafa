//! Resource Fetcher
//!
//! Drains paged queries and turns the raw records into domain entities,
//! optionally fetching auxiliary records per item first.

use super::adapter::Derivable;
use crate::cf::provider::{ListQuery, Page, RawRecord, ResourceProvider};
use crate::error::{CfError, CfResult};
use futures::future::{self, BoxFuture};
use futures::stream::{self, Stream, TryStreamExt};
use std::future::Future;

/// Lazily drain every page of a query, starting at page 1.
///
/// Pages are requested one after another, each only once the previous one
/// reported more data. Order is the provider's. The first failing page ends
/// the stream with that error. Calling this again re-drains from page 1.
pub fn drain<F, Fut>(query: F) -> impl Stream<Item = CfResult<RawRecord>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = CfResult<Page>>,
{
    stream::try_unfold((query, Some(1u32)), |(query, next)| async move {
        let Some(number) = next else {
            return Ok(None);
        };

        let page = query(number).await?;
        tracing::debug!(
            "Drained page {} ({} records, total pages {:?})",
            number,
            page.resources.len(),
            page.total_pages
        );

        // A provider that only flags `has_next` but returns an empty page is
        // treated as exhausted.
        let exhausted = page.total_pages.is_none() && page.resources.is_empty();
        let next = (!exhausted && page.has_more(number)).then(|| number + 1);

        let records = stream::iter(page.resources.into_iter().map(Ok::<RawRecord, CfError>));
        Ok::<_, CfError>(Some((records, (query, next))))
    })
    .try_flatten()
}

/// Drain every page into one ordered vector.
pub async fn drain_all<F, Fut>(query: F) -> CfResult<Vec<RawRecord>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = CfResult<Page>>,
{
    drain(query).try_collect().await
}

/// Page function for a list query against a provider.
pub fn pages<'a, P>(
    provider: &'a P,
    query: &'a ListQuery,
) -> impl Fn(u32) -> BoxFuture<'a, CfResult<Page>> + 'a
where
    P: ResourceProvider + ?Sized,
{
    move |page| provider.list_page(query, page)
}

/// Drain and derive, no auxiliary fetches.
pub async fn fetch_all<F, Fut, W, D>(query: F, wrap: W) -> CfResult<Vec<D::Output>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = CfResult<Page>>,
    W: Fn(RawRecord) -> D,
    D: Derivable,
{
    drain(query)
        .and_then(|record| future::ready(wrap(record).derive()))
        .try_collect()
        .await
}

/// Drain, then resolve each record's auxiliary content concurrently before
/// deriving.
///
/// All auxiliary fetches run at once; the first failure cancels the rest and
/// is returned. Callers that need a particular order sort afterwards.
pub async fn fetch_all_with_auxiliary<F, Fut, A, AFut, D>(
    query: F,
    auxiliary: A,
) -> CfResult<Vec<D::Output>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = CfResult<Page>>,
    A: Fn(RawRecord) -> AFut,
    AFut: Future<Output = CfResult<D>>,
    D: Derivable,
{
    let records = drain_all(query).await?;
    let count = records.len();

    let adapters = future::try_join_all(records.into_iter().map(auxiliary)).await?;
    tracing::debug!("Resolved auxiliary content for {} records", count);

    adapters.iter().map(Derivable::derive).collect()
}

/// Fetch the single record a query matches, if any.
///
/// Only the first page is requested. More than one match means the filter
/// was ambiguous and is reported as `Ambiguous`.
pub async fn fetch_one_record<F, Fut>(query: F) -> CfResult<Option<RawRecord>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = CfResult<Page>>,
{
    let page = query(1).await?;
    if page.resources.len() > 1 || (page.resources.len() == 1 && page.has_more(1)) {
        return Err(CfError::Ambiguous(format!(
            "expected at most one result, got {}",
            if page.resources.len() > 1 {
                page.resources.len().to_string()
            } else {
                "more than one page".to_string()
            }
        )));
    }
    Ok(page.resources.into_iter().next())
}

/// Single-result variant of [`fetch_all`].
pub async fn fetch_one<F, Fut, W, D>(query: F, wrap: W) -> CfResult<Option<D::Output>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = CfResult<Page>>,
    W: FnOnce(RawRecord) -> D,
    D: Derivable,
{
    fetch_one_record(query)
        .await?
        .map(|record| wrap(record).derive())
        .transpose()
}

/// Single-result variant of [`fetch_all_with_auxiliary`].
pub async fn fetch_one_with_auxiliary<F, Fut, A, AFut, D>(
    query: F,
    auxiliary: A,
) -> CfResult<Option<D::Output>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = CfResult<Page>>,
    A: FnOnce(RawRecord) -> AFut,
    AFut: Future<Output = CfResult<D>>,
    D: Derivable,
{
    match fetch_one_record(query).await? {
        Some(record) => auxiliary(record).await?.derive().map(Some),
        None => Ok(None),
    }
}
