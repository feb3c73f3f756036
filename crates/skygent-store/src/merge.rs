//! K-way ordered merge of per-store query streams.
//!
//! Each input is a small pull adapter: a buffered chunk plus a keyset
//! cursor into its store. The merge keeps one head per input and on every
//! step emits the best head under the total post order
//! `(created_at, uri, store)`, then refills that slot. Any consumed prefix
//! is therefore in order no matter how fast each store produces; a failing
//! input fails the merged stream, an exhausted input drops out.
//!
//! With a handful of stores a linear scan over the heads beats a heap, so
//! there is none.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use skygent_core::{Post, StoreName};
use skygent_filter::Predicate;

use crate::query::{PostCursor, QueryOpts, SortOrder};
use crate::{Store, StoreResult};

/// How many posts each input buffers per pull.
const CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct QueryHit {
    pub store: StoreName,
    pub post: Post,
}

struct MergeInput {
    store: Arc<Store>,
    buf: VecDeque<Post>,
    cursor: Option<PostCursor>,
    exhausted: bool,
}

impl MergeInput {
    async fn fill(
        &mut self,
        opts: &QueryOpts,
        filter: Option<&Predicate>,
    ) -> StoreResult<()> {
        while self.buf.is_empty() && !self.exhausted {
            let page = self
                .store
                .scan_page(opts, filter, self.cursor.as_ref(), CHUNK_SIZE)
                .await?;
            self.buf.extend(page.posts);
            match page.next {
                Some(next) => self.cursor = Some(next),
                None => self.exhausted = true,
            }
        }
        Ok(())
    }
}

fn hit_key<'h>(store: &'h StoreName, post: &'h Post) -> (skygent_core::Timestamp, &'h str, &'h str) {
    (post.created_at, post.uri.as_str(), store.as_str())
}

/// Merge the query results of several stores into one ordered stream.
pub fn merge_stores(
    stores: Vec<Arc<Store>>,
    opts: QueryOpts,
    filter: Option<Arc<Predicate>>,
) -> impl Stream<Item = StoreResult<QueryHit>> + use<> {
    async_stream::try_stream! {
        let mut inputs: Vec<MergeInput> = stores
            .into_iter()
            .map(|store| MergeInput {
                store,
                buf: VecDeque::new(),
                cursor: None,
                exhausted: false,
            })
            .collect();

        loop {
            // Refill every empty slot, dropping exhausted inputs.
            for input in &mut inputs {
                input.fill(&opts, filter.as_deref()).await?;
            }
            inputs.retain(|input| !input.buf.is_empty());
            if inputs.is_empty() {
                break;
            }

            let mut best = 0;
            for candidate in 1..inputs.len() {
                let best_head = inputs[best].buf.front().expect("non-empty after retain");
                let head = inputs[candidate].buf.front().expect("non-empty after retain");
                let ordering = hit_key(inputs[candidate].store.name(), head)
                    .cmp(&hit_key(inputs[best].store.name(), best_head));
                let better = match opts.order {
                    SortOrder::Asc => ordering == Ordering::Less,
                    SortOrder::Desc => ordering == Ordering::Greater,
                };
                if better {
                    best = candidate;
                }
            }

            let input = &mut inputs[best];
            let post = input.buf.pop_front().expect("non-empty after retain");
            yield QueryHit {
                store: input.store.name().clone(),
                post,
            };
        }
    }
}
