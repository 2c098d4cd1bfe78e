//! Memory capacity reconciliation between the two schemas.
//!
//! The legacy schema records how much memory a node has left, the successor schema
//! records how much it has in total. The two are related per node by
//!
//! ```text
//! total = available + sum(memory reserved by containers on the node)
//! ```
//!
//! CPU needs no conversion: the legacy CPU map already describes the full pool.

use api_types::AvailableCapacity;
use api_types::Container;
use api_types::TotalCapacity;
use error_stack::Report;

use super::errors::ReconcileError;

/// Sum of memory reserved by `containers`.
pub fn reserved_memory<'a, I>(containers: I) -> Result<u64, Report<ReconcileError>>
where
    I: IntoIterator<Item = &'a Container>,
{
    containers
        .into_iter()
        .try_fold(0u64, |reserved, container| {
            reserved.checked_add(container.memory).ok_or_else(|| {
                Report::new(ReconcileError::ReservationOverflow {
                    reserved,
                    container: container.memory,
                })
                .attach_printable(format!("container {}", container.id))
            })
        })
}

/// Recover the total capacity of a node from its available capacity and the
/// containers currently holding memory on it.
pub fn total_capacity(
    available: AvailableCapacity,
    containers: &[Container],
) -> Result<TotalCapacity, Report<ReconcileError>> {
    total_with_reserved(available, reserved_memory(containers)?)
}

/// Add an already summed reservation back onto the available capacity.
pub fn total_with_reserved(
    available: AvailableCapacity,
    reserved: u64,
) -> Result<TotalCapacity, Report<ReconcileError>> {
    available
        .0
        .checked_add(reserved)
        .map(TotalCapacity)
        .ok_or_else(|| {
            Report::new(ReconcileError::CapacityOverflow {
                available: available.0,
                reserved,
            })
        })
}

/// Inverse of [`total_capacity`]: the memory left once `containers` are placed.
pub fn available_capacity(
    total: TotalCapacity,
    containers: &[Container],
) -> Result<AvailableCapacity, Report<ReconcileError>> {
    let reserved = reserved_memory(containers)?;
    total
        .0
        .checked_sub(reserved)
        .map(AvailableCapacity)
        .ok_or_else(|| {
            Report::new(ReconcileError::CapacityUnderflow {
                total: total.0,
                reserved,
            })
        })
}

#[cfg(test)]
mod tests {
    use api_types::CpuMap;
    use similar_asserts::assert_eq;

    use super::*;

    fn container(id: &str, memory: u64) -> Container {
        Container {
            id: id.to_string(),
            name: id.to_string(),
            pod_name: "prod".to_string(),
            node_name: "n1".to_string(),
            cpu: CpuMap::default(),
            memory,
            labels: Default::default(),
        }
    }

    #[test]
    fn node_without_containers_keeps_its_capacity() {
        let total = total_capacity(AvailableCapacity(2000), &[]).expect("should reconcile");
        assert_eq!(total, TotalCapacity(2000));
    }

    #[test]
    fn total_adds_back_every_reservation() {
        let containers = vec![container("a", 500), container("b", 250), container("c", 0)];

        let total =
            total_capacity(AvailableCapacity(1000), &containers).expect("should reconcile");

        assert_eq!(total, TotalCapacity(1750));
    }

    #[test]
    fn capacity_is_conserved_across_the_round_trip() {
        let cases: &[(u64, &[u64])] = &[
            (0, &[]),
            (0, &[1, 2, 3]),
            (1000, &[500]),
            (4 << 30, &[1 << 30, 512 << 20, 256 << 20]),
        ];

        for (available, reservations) in cases {
            let containers: Vec<_> = reservations
                .iter()
                .enumerate()
                .map(|(i, m)| container(&i.to_string(), *m))
                .collect();

            let total = total_capacity(AvailableCapacity(*available), &containers)
                .expect("should reconcile");
            assert_eq!(total.0, available + reservations.iter().sum::<u64>());

            let back = available_capacity(total, &containers).expect("should derive available");
            assert_eq!(back, AvailableCapacity(*available));
        }
    }

    #[test]
    fn overflowing_total_is_an_error() {
        let containers = vec![container("a", 10)];

        let err = total_capacity(AvailableCapacity(u64::MAX - 5), &containers)
            .expect_err("should overflow");

        assert!(matches!(
            err.current_context(),
            ReconcileError::CapacityOverflow { reserved: 10, .. }
        ));
    }

    #[test]
    fn overflowing_reservations_are_an_error() {
        let containers = vec![container("a", u64::MAX), container("b", 1)];

        let err = reserved_memory(&containers).expect_err("should overflow");

        assert!(matches!(
            err.current_context(),
            ReconcileError::ReservationOverflow {
                reserved: u64::MAX,
                container: 1
            }
        ));
    }

    #[test]
    fn total_from_summed_reservation_matches_total_capacity() {
        let containers = vec![container("a", 500), container("b", 250)];
        let reserved = reserved_memory(&containers).expect("should sum");

        assert_eq!(
            total_with_reserved(AvailableCapacity(1000), reserved).expect("should reconcile"),
            total_capacity(AvailableCapacity(1000), &containers).expect("should reconcile")
        );
    }

    #[test]
    fn reservations_above_total_are_an_error() {
        let containers = vec![container("a", 600)];

        let err =
            available_capacity(TotalCapacity(500), &containers).expect_err("should underflow");

        assert!(matches!(
            err.current_context(),
            ReconcileError::CapacityUnderflow {
                total: 500,
                reserved: 600
            }
        ));
    }
}
