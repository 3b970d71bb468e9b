use proptest::prelude::*;
use worker_core::vector::l2_normalize;
use worker_index::{AnnIndex, CosineHnsw};

fn unit(mut v: Vec<f32>) -> Vec<f32> {
    l2_normalize(&mut v);
    v
}

proptest! {
    #[test]
    fn inserted_vector_is_its_own_nearest_neighbor(
        seed_vectors in proptest::collection::vec(
            proptest::collection::vec(-1.0f32..1.0, 6),
            1..20,
        )
    ) {
        let index = CosineHnsw::new(6);
        let normalized: Vec<Vec<f32>> = seed_vectors.into_iter().map(unit).collect();
        for (i, v) in normalized.iter().enumerate() {
            // Skip vectors that normalized to (near) zero — they never recall.
            if v.iter().any(|x| *x != 0.0) {
                index.add(i as u32, v).unwrap();
            }
        }

        for (i, v) in normalized.iter().enumerate() {
            if v.iter().all(|x| *x == 0.0) {
                continue;
            }
            let results = index.search(v, normalized.len());
            prop_assert!(!results.is_empty());
            prop_assert_eq!(results[0].0, i as u32);
            prop_assert!(results[0].1 >= 0.999);
        }
    }

    #[test]
    fn result_count_never_exceeds_k_or_index_size(
        count in 1usize..40,
        k in 0usize..50,
    ) {
        let index = CosineHnsw::new(4);
        for i in 0..count as u32 {
            let mut v = vec![0.0f32; 4];
            v[(i % 4) as usize] = 1.0 + (i as f32) * 0.001;
            index.add(i, &unit(v)).unwrap();
        }
        let results = index.search(&unit(vec![1.0, 0.2, 0.0, 0.0]), k);
        prop_assert!(results.len() <= k.min(count));
    }
}
