//! Decides who paginates a ticket list: the upstream, or us.
//!
//! The upstream sometimes ignores `page`/`pageSize` and returns everything
//! with no metadata. When that happens (no pagination keys, or more items
//! than a page can hold) search, filters and slicing are applied locally.

use serde_json::{Map, Value};
use tracing::debug;

use crate::model::{Ticket, TicketPage, TicketPriority, TicketStatus};
use crate::normalize::{aliases, as_number, ticket_listing};

/// Filter value meaning "do not filter on this field".
pub const ALL: &str = "all";

/// Inbound `GET /tickets` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: usize,
    pub page_size: usize,
    pub q: String,
    pub status: String,
    pub priority: String,
    pub responsible: String,
}

impl ListQuery {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
            q: String::new(),
            status: ALL.to_string(),
            priority: ALL.to_string(),
            responsible: ALL.to_string(),
        }
    }

    /// Read from query-string pairs. Numbers accept any numeric notation and
    /// are floored; missing or unparsable ones use defaults.
    pub fn from_params(params: &[(String, String)], default_page_size: usize) -> Self {
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.trim().to_string())
        };
        let number = |key: &str, default: usize| {
            get(key)
                .and_then(|v| as_number(&Value::String(v)))
                .map(|n| n.floor().max(1.0) as usize)
                .unwrap_or(default)
                .max(1)
        };
        let filter = |key: &str| get(key).filter(|v| !v.is_empty()).unwrap_or_else(|| ALL.into());

        Self {
            page: number("page", 1),
            page_size: number("pageSize", default_page_size),
            q: get("q").unwrap_or_default(),
            status: filter("status"),
            priority: filter("priority"),
            responsible: filter("responsible"),
        }
    }

    fn matches(&self, ticket: &Ticket) -> bool {
        if !self.q.is_empty()
            && !ticket
                .haystack()
                .to_lowercase()
                .contains(&self.q.to_lowercase())
        {
            return false;
        }

        if self.status != ALL && TicketStatus::parse(&self.status) != Some(ticket.status) {
            return false;
        }

        if self.priority != ALL && TicketPriority::parse(&self.priority) != Some(ticket.priority)
        {
            return false;
        }

        self.responsible == ALL || ticket.responsible == self.responsible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationMode {
    Local,
    Upstream,
}

/// `max(1, ceil(total_items / page_size))`
pub fn total_pages(total_items: usize, page_size: usize) -> usize {
    total_items.div_ceil(page_size.max(1)).max(1)
}

pub fn has_pagination_meta(container: Option<&Map<String, Value>>) -> bool {
    container.is_some_and(|map| aliases::PAGINATION_META.iter().any(|k| map.contains_key(*k)))
}

/// Non-negative count stored under the first present alias.
fn meta_count(meta: Option<&Map<String, Value>>, keys: &[&str]) -> Option<usize> {
    meta.and_then(|m| keys.iter().find_map(|k| m.get(*k)))
        .and_then(as_number)
        .filter(|n| *n >= 0.0)
        .map(|n| n as usize)
}

pub fn choose_mode(
    container: Option<&Map<String, Value>>,
    item_count: usize,
    query: &ListQuery,
) -> PaginationMode {
    let declared = meta_count(container, aliases::PAGE_SIZE).filter(|n| *n > 0);
    if !has_pagination_meta(container)
        || item_count > query.page_size
        || declared.is_some_and(|size| item_count > size)
    {
        PaginationMode::Local
    } else {
        PaginationMode::Upstream
    }
}

/// Normalize an upstream list payload into the page the browser asked for.
pub fn paginate(payload: &Value, query: &ListQuery) -> TicketPage {
    let listing = ticket_listing(payload);
    let mode = choose_mode(listing.container, listing.items.len(), query);
    debug!(?mode, items = listing.items.len(), "paginating ticket list");

    match mode {
        PaginationMode::Local => paginate_locally(listing.items, query),
        PaginationMode::Upstream => trust_upstream(listing.items, listing.container, query),
    }
}

/// Search, filter, then slice the requested page out of the full set.
pub fn paginate_locally(items: Vec<Ticket>, query: &ListQuery) -> TicketPage {
    let filtered: Vec<Ticket> = items.into_iter().filter(|t| query.matches(t)).collect();

    let page_size = query.page_size.max(1);
    let total_items = filtered.len();
    let total_pages = total_pages(total_items, page_size);
    let page = query.page.clamp(1, total_pages);

    let items = filtered
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    TicketPage {
        items,
        page,
        page_size,
        total_items,
        total_pages,
    }
}

fn trust_upstream(
    items: Vec<Ticket>,
    meta: Option<&Map<String, Value>>,
    query: &ListQuery,
) -> TicketPage {
    let count = |keys: &[&str]| meta_count(meta, keys);

    let page_size = count(aliases::PAGE_SIZE)
        .filter(|n| *n > 0)
        .unwrap_or(query.page_size);
    let total_items = count(aliases::TOTAL_ITEMS).unwrap_or(items.len());
    let total_pages = count(aliases::TOTAL_PAGES)
        .unwrap_or_else(|| total_pages(total_items, page_size))
        .max(1);
    let page = count(aliases::PAGE)
        .unwrap_or(query.page)
        .clamp(1, total_pages);

    TicketPage {
        items,
        page,
        page_size,
        total_items,
        total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TicketPriority, TicketStatus};
    use serde_json::json;
    use std::collections::HashSet;

    fn ticket(i: usize) -> Value {
        let status = ["Aberto", "Em andamento", "Fechado"][i % 3];
        let priority = ["Baixa", "Média", "Alta", "Urgente"][i % 4];
        let subject = if i % 2 == 0 { "Erro no pagamento" } else { "Acesso bloqueado" };
        let responsible = if i % 5 == 0 { "Ana" } else { "Leo" };
        json!({
            "id": format!("id-{i}"),
            "ticketId": format!("TK{i:03}"),
            "client": format!("Cliente {i}"),
            "email": format!("c{i}@teste.com"),
            "subject": subject,
            "priority": priority,
            "status": status,
            "responsible": responsible,
        })
    }

    fn tickets(n: usize) -> Value {
        Value::Array((0..n).map(ticket).collect())
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_total_pages_never_zero() {
        assert_eq!(total_pages(0, 15), 1);
        assert_eq!(total_pages(15, 15), 1);
        assert_eq!(total_pages(16, 15), 2);
        assert_eq!(total_pages(37, 15), 3);
        assert_eq!(total_pages(5, 0), 5);
    }

    #[test]
    fn test_query_defaults_and_clamping() {
        let query = ListQuery::from_params(&params(&[]), 15);
        assert_eq!(query, ListQuery::new(1, 15));

        let query = ListQuery::from_params(
            &params(&[("page", "0"), ("pageSize", "abc"), ("q", "  pag "), ("status", "")]),
            15,
        );
        assert_eq!(query.page, 1);
        assert_eq!(query.page_size, 15);
        assert_eq!(query.q, "pag");
        assert_eq!(query.status, ALL);
    }

    #[test]
    fn test_query_numbers_accept_decimal_and_exponent() {
        let query = ListQuery::from_params(
            &params(&[("page", "2.0"), ("pageSize", "1e1")]),
            15,
        );
        assert_eq!(query.page, 2);
        assert_eq!(query.page_size, 10);

        let query = ListQuery::from_params(&params(&[("page", "3.7"), ("pageSize", "-4")]), 15);
        assert_eq!(query.page, 3);
        assert_eq!(query.page_size, 1);
    }

    #[test]
    fn test_local_pagination_example() {
        let query = ListQuery::from_params(&params(&[("page", "2"), ("pageSize", "15")]), 15);
        let page = paginate(&tickets(37), &query);

        assert_eq!(page.page, 2);
        assert_eq!(page.page_size, 15);
        assert_eq!(page.total_items, 37);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 15);
        assert_eq!(page.items[0].id, "id-15");
        assert_eq!(page.items[14].id, "id-29");
    }

    #[test]
    fn test_status_and_search_filter_example() {
        let payload = json!([
            { "id": "1", "status": "Aberto", "subject": "Erro no pagamento" },
            { "id": "2", "status": "Fechado", "subject": "pagamento ok" }
        ]);
        let query = ListQuery::from_params(
            &params(&[("status", "Aberto"), ("q", "PAGAMENTO")]),
            15,
        );

        let page = paginate(&payload, &query);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "1");
        assert_eq!(page.total_items, 1);
    }

    #[test]
    fn test_priority_and_responsible_filters() {
        let mut query = ListQuery::new(1, 100);
        query.priority = "Urgente".into();
        query.responsible = "Ana".into();

        let page = paginate(&tickets(40), &query);
        assert!(!page.items.is_empty());
        assert!(page
            .items
            .iter()
            .all(|t| t.priority == TicketPriority::Urgent && t.responsible == "Ana"));
    }

    #[test]
    fn test_unknown_filter_value_matches_nothing() {
        let mut query = ListQuery::new(1, 100);
        query.status = "Arquivado".into();
        let page = paginate(&tickets(10), &query);
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.page, 1);
    }

    #[test]
    fn test_page_clamped_into_range() {
        let query = ListQuery::new(9, 10);
        let page = paginate(&tickets(12), &query);
        assert_eq!(page.page, 2);
        assert_eq!(page.items.len(), 2);
    }

    #[test]
    fn test_concatenated_pages_rebuild_filtered_set() {
        let mut base = ListQuery::new(1, 4);
        base.q = "pagamento".into();
        base.status = "Em andamento".into();

        let everything = paginate_locally(
            crate::normalize::normalize_ticket_list(&tickets(50)),
            &ListQuery {
                page_size: 1000,
                ..base.clone()
            },
        );

        let first = paginate(&tickets(50), &base);
        let mut seen = Vec::new();
        for page in 1..=first.total_pages {
            let query = ListQuery { page, ..base.clone() };
            let result = paginate(&tickets(50), &query);
            assert!(result.items.len() <= query.page_size);
            assert_eq!(result.total_items, first.total_items);
            seen.extend(result.items);
        }

        let unique: HashSet<_> = seen.iter().map(|t| t.id.clone()).collect();
        assert_eq!(unique.len(), seen.len());
        assert_eq!(seen, everything.items);
        assert!(seen.iter().all(|t| t.status == TicketStatus::InProgress));
    }

    #[test]
    fn test_upstream_metadata_is_trusted() {
        let payload = json!({
            "items": tickets(5),
            "current_page": 3,
            "per_page_ignored": 99,
            "pageSize": "5",
            "total": 42,
            "totalPages": 9
        });
        let query = ListQuery::new(1, 5);
        let page = paginate(&payload, &query);

        assert_eq!(page.items.len(), 5);
        assert_eq!(page.page, 3);
        assert_eq!(page.page_size, 5);
        assert_eq!(page.total_items, 42);
        assert_eq!(page.total_pages, 9);
    }

    #[test]
    fn test_upstream_mode_computes_missing_totals() {
        let payload = json!({ "data": tickets(3), "total_items": 23 });
        let query = ListQuery::new(2, 10);
        let page = paginate(&payload, &query);

        assert_eq!(page.page, 2);
        assert_eq!(page.page_size, 10);
        assert_eq!(page.total_items, 23);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn test_upstream_filters_are_not_reapplied() {
        let payload = json!({ "items": tickets(3), "page": 1, "totalItems": 3 });
        let mut query = ListQuery::new(1, 10);
        query.q = "does-not-match".into();

        let page = paginate(&payload, &query);
        assert_eq!(page.items.len(), 3);
    }

    #[test]
    fn test_oversized_page_forces_local_mode() {
        let payload = json!({ "items": tickets(30), "page": 1, "totalItems": 30 });
        let query = ListQuery::new(1, 10);

        let listing = ticket_listing(&payload);
        assert_eq!(
            choose_mode(listing.container, listing.items.len(), &query),
            PaginationMode::Local
        );
        let page = paginate(&payload, &query);
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn test_page_larger_than_declared_size_forces_local_mode() {
        let payload = json!({ "items": tickets(5), "pageSize": 2, "totalItems": 5 });
        let query = ListQuery::new(1, 10);

        let listing = ticket_listing(&payload);
        assert_eq!(
            choose_mode(listing.container, listing.items.len(), &query),
            PaginationMode::Local
        );
        let page = paginate(&payload, &query);
        assert_eq!(page.page_size, 10);
        assert_eq!(page.items.len(), 5);
        assert!(page.items.len() <= page.page_size);
    }
}
