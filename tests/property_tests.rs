use fmeans::cluster::{distortion, Clustering, MahalanobisKmeans};
use fmeans::Error;
use nalgebra::DMatrix;
use proptest::prelude::*;

/// Points plus a diagonal SPD metric per point.
fn observations() -> impl Strategy<Value = (Vec<Vec<f64>>, Vec<DMatrix<f64>>)> {
    prop::collection::vec(
        (
            prop::collection::vec(-10.0f64..10.0, 2),
            prop::collection::vec(0.1f64..5.0, 2),
        ),
        1..20,
    )
    .prop_map(|rows| {
        let (points, diags): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
        let metrics = diags
            .into_iter()
            .map(|d| DMatrix::from_diagonal(&nalgebra::DVector::from_vec(d)))
            .collect();
        (points, metrics)
    })
}

proptest! {
    #[test]
    fn prop_all_assigned_and_no_empty_cluster(
        (data, metrics) in observations(),
        k in 1usize..5,
        seed in 0u64..1000,
    ) {
        // Skip if k > n
        if k <= data.len() {
            let model = MahalanobisKmeans::new(k).with_seed(seed);
            match model.fit(&data, &metrics) {
                Ok(fit) => {
                    prop_assert_eq!(fit.labels().len(), data.len());
                    for &l in fit.labels() {
                        prop_assert!(l < k);
                    }
                    prop_assert!(fit.cluster_sizes().iter().all(|&s| s > 0));
                    prop_assert_eq!(fit.centroids().len(), k);
                }
                // Random points may coincide; an emptied cluster is the only allowed failure.
                Err(e) => prop_assert!(matches!(e, Error::DegenerateCluster { .. }), "{}", e),
            }
        }
    }

    #[test]
    fn prop_fit_is_deterministic(
        (data, metrics) in observations(),
        k in 1usize..4,
        seed in 0u64..1000,
    ) {
        if k <= data.len() {
            let model = MahalanobisKmeans::new(k).with_seed(seed);
            let a = model.fit_predict(&data, &metrics);
            let b = model.fit_predict(&data, &metrics);
            match (a, b) {
                (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
                (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
                _ => prop_assert!(false, "same seed gave different outcomes"),
            }
        }
    }

    #[test]
    fn prop_distortion_never_increases(
        (data, metrics) in observations(),
        k in 1usize..4,
        seed in 0u64..1000,
    ) {
        if k <= data.len() {
            if let Ok(fit) = MahalanobisKmeans::new(k).with_seed(seed).fit(&data, &metrics) {
                for pair in fit.distortion_history().windows(2) {
                    prop_assert!(pair[1] <= pair[0] + 1e-9 * pair[0].abs().max(1.0));
                }
                let total = distortion(&data, &metrics, fit.centroids(), fit.labels()).unwrap();
                prop_assert!((total - fit.distortion()).abs() <= 1e-9 * total.abs().max(1.0));
            }
        }
    }
}
