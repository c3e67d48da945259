//! Integration tests for host port allocation.

use proptest::prelude::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vmforge::ForgeError;
use vmforge::net::PortAllocator;

// ============================================================================
// RANGE PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_allocated_port_is_in_range(min in 40000u16..40500, width in 0u16..50) {
        let max = min + width;
        let rt = tokio::runtime::Runtime::new().unwrap();
        let tmp = TempDir::new().unwrap();

        let result = rt.block_on(async {
            PortAllocator::new(min, max)
                .with_lock_dir(tmp.path())
                .allocate(&CancellationToken::new())
                .await
        });

        match result {
            Ok(lease) => prop_assert!((min..=max).contains(&lease.port())),
            // Every port of a narrow range may be taken on a busy host.
            Err(e) => prop_assert!(matches!(e, ForgeError::ResourceAcquisition(_))),
        }
    }

    #[test]
    fn test_inverted_range_is_config_error(min in 1025u16..65535, delta in 1u16..100) {
        let max = min.saturating_sub(delta);
        prop_assume!(max < min);
        let rt = tokio::runtime::Runtime::new().unwrap();

        let err = rt
            .block_on(PortAllocator::new(min, max).allocate(&CancellationToken::new()))
            .unwrap_err();
        prop_assert!(matches!(err, ForgeError::Config(_)));
    }
}

// ============================================================================
// EXCLUSION
// ============================================================================

#[tokio::test]
async fn concurrent_leases_get_distinct_ports() {
    let tmp = TempDir::new().unwrap();
    let allocator = PortAllocator::new(41000, 41200).with_lock_dir(tmp.path());
    let cancel = CancellationToken::new();

    let mut leases = Vec::new();
    for _ in 0..5 {
        leases.push(allocator.allocate(&cancel).await.unwrap());
    }

    let mut ports: Vec<u16> = leases.iter().map(|l| l.port()).collect();
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 5);
}
