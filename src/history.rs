//! Transaction history for an address.

use crate::chain::{AccountTx, ChainReader};
use crate::error::Result;

use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

pub const PAGE_SIZE: u32 = 50;
/// Pause between page requests to stay under API rate limits.
pub const PAGE_PAUSE: Duration = Duration::from_secs(1);

/// Fetch every transaction the API reports for `address`, newest first.
///
/// Stops once the reported total is reached or a page comes back empty.
/// `on_page` sees the running count and the total after each page.
pub async fn account_history<R: ChainReader>(
    reader: &R,
    address: &str,
    mut on_page: impl FnMut(usize, u64),
) -> Result<Vec<AccountTx>> {
    let mut transactions = Vec::new();
    let mut offset: u32 = 0;
    loop {
        let page = reader
            .account_transactions(address, PAGE_SIZE, offset)
            .await?;
        debug!(offset, total = page.total, returned = page.results.len(), "history page");
        if page.results.is_empty() {
            break;
        }
        offset = offset.saturating_add(page.results.len() as u32);
        transactions.extend(page.results);
        on_page(transactions.len(), page.total);
        if offset as u64 >= page.total {
            break;
        }
        sleep(PAGE_PAUSE).await;
    }
    Ok(transactions)
}
