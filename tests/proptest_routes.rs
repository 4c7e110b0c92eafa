//! Property-based tests using proptest
//!
//! These tests verify route URI resolution, route equality and the
//! pagination drain using randomized inputs.

use cfkit::cf::provider::{Page, RawRecord};
use cfkit::error::CfResult;
use cfkit::resource::{drain_all, resolve, RouteDescriptor};
use futures::future;
use proptest::prelude::*;
use serde_json::json;

/// Generate a DNS label
fn arb_label() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,7}"
}

/// Generate a domain name like `apps.example.com`
fn arb_domain() -> impl Strategy<Value = String> {
    (prop::collection::vec(arb_label(), 1..3), prop_oneof!["com", "org", "io"])
        .prop_map(|(labels, tld)| format!("{}.{}", labels.join("."), tld))
}

/// Generate a normalized route path (empty or `/a/b`)
fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9]{1,8}", 0..3).prop_map(|segments| {
        segments
            .iter()
            .map(|s| format!("/{}", s))
            .collect::<String>()
    })
}

/// Pages of the given sizes numbering records consecutively
fn paged(
    sizes: Vec<usize>,
    report_total: bool,
) -> impl Fn(u32) -> future::Ready<CfResult<Page>> {
    move |number| {
        let idx = (number - 1) as usize;
        let start: usize = sizes[..idx].iter().sum();
        let resources = (start..start + sizes[idx])
            .map(|n| RawRecord::from_v3(json!({ "n": n })))
            .collect();
        future::ready(Ok(Page {
            resources,
            total_pages: report_total.then_some(sizes.len() as u32),
            has_next: idx + 1 < sizes.len(),
        }))
    }
}

fn numbers(records: &[RawRecord]) -> Vec<u64> {
    records.iter().filter_map(|r| r.u64_field("n")).collect()
}

proptest! {
    /// host.domain/path resolves back to its parts
    #[test]
    fn test_resolve_round_trip(
        host in arb_label(),
        domain in arb_domain(),
        path in arb_path(),
        with_scheme in any::<bool>(),
    ) {
        let uri = if with_scheme {
            format!("https://{}.{}{}", host, domain, path)
        } else {
            format!("{}.{}{}", host, domain, path)
        };

        let route = resolve(&uri, [domain.as_str()].into_iter()).unwrap();
        prop_assert_eq!(route.host_or_empty(), host.as_str());
        prop_assert_eq!(&route.domain, &domain);
        prop_assert_eq!(route.path_or_empty(), path.as_str());
        prop_assert_eq!(route.port, None);
    }

    /// The hostname resolves as an exact domain first, then as a single
    /// label in front of a known domain
    #[test]
    fn test_resolve_prefers_exact_then_first_split(
        labels in prop::collection::vec("[a-z]{1,5}", 1..5),
        chosen in prop::collection::vec(any::<bool>(), 5),
        noise in prop::collection::vec("[0-9]{3}\\.test", 0..3),
    ) {
        let hostname = labels.join(".");
        let suffixes: Vec<String> = (0..labels.len())
            .map(|i| labels[i..].join("."))
            .collect();
        let mut known: Vec<String> = suffixes
            .iter()
            .zip(&chosen)
            .filter(|(_, pick)| **pick)
            .map(|(s, _)| s.clone())
            .collect();
        known.extend(noise);

        let result = resolve(&hostname, known.iter().map(String::as_str));

        let expected = suffixes
            .iter()
            .enumerate()
            .take(2)
            .find(|(i, _)| chosen[*i])
            .map(|(i, s)| (labels[..i].join("."), s.clone()));

        match expected {
            Some((host, domain)) => {
                let route = result.unwrap();
                prop_assert_eq!(&route.domain, &domain);
                prop_assert_eq!(route.host_or_empty(), host.as_str());
            },
            None => prop_assert!(result.unwrap_err().is_not_found()),
        }
    }

    /// A host never contains a dot
    #[test]
    fn test_resolved_host_is_single_label(
        labels in prop::collection::vec("[a-z]{1,5}", 1..6),
        domain_at in 0usize..6,
    ) {
        let hostname = labels.join(".");
        let domain = labels[domain_at % labels.len()..].join(".");
        if let Ok(route) = resolve(&hostname, [domain.as_str()].into_iter()) {
            prop_assert!(!route.host_or_empty().contains('.'));
        }
    }

    /// Absent and empty host/path describe the same URI
    #[test]
    fn test_absent_equals_empty(
        domain in arb_domain(),
        port in prop::option::of(1024u16..65535),
        host_absent in any::<bool>(),
        path_absent in any::<bool>(),
    ) {
        let a = RouteDescriptor::new(None, &domain, None, port);
        let b = RouteDescriptor::new(
            (!host_absent).then_some(""),
            &domain,
            (!path_absent).then_some(""),
            port,
        );
        prop_assert!(a.describes_the_same_uri(&b));
        prop_assert!(b.describes_the_same_uri(&a));
    }

    /// Splitting the same text differently between host and domain is a
    /// different route
    #[test]
    fn test_same_concatenation_differs(
        text in "[a-z]{3,12}",
        i in 1usize..12,
        j in 1usize..12,
    ) {
        let len = text.len();
        let (i, j) = (i % (len - 1) + 1, j % (len - 1) + 1);
        prop_assume!(i != j);

        let a = RouteDescriptor::new(Some(&text[..i]), &text[i..], None, None);
        let b = RouteDescriptor::new(Some(&text[..j]), &text[j..], None, None);
        prop_assert!(!a.describes_the_same_uri(&b));
    }

    /// Draining yields every record exactly once, in page order
    #[test]
    fn test_drain_length_and_order(
        sizes in prop::collection::vec(0usize..6, 1..8),
    ) {
        let total: usize = sizes.iter().sum();
        let records = tokio_test::block_on(drain_all(paged(sizes, true))).unwrap();
        prop_assert_eq!(numbers(&records), (0..total as u64).collect::<Vec<_>>());
    }

    /// Providers that only flag a next page are drained the same way
    #[test]
    fn test_drain_follows_next_flag(
        sizes in prop::collection::vec(1usize..6, 1..8),
    ) {
        let total: usize = sizes.iter().sum();
        let records = tokio_test::block_on(drain_all(paged(sizes, false))).unwrap();
        prop_assert_eq!(records.len(), total);
        prop_assert_eq!(numbers(&records), (0..total as u64).collect::<Vec<_>>());
    }
}
