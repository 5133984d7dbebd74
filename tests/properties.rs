//! Property tests: every layout and algorithm choice computes the same prefixes
//! as a sequential fold.

use ferroscan::local::Fabric;
use ferroscan::{AlgorithmChoice, Datatype, Element, NodeMap, Operator, ScanConfig};
use proptest::prelude::*;

/// 2x2 integer matrices under multiplication: associative, not commutative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Matrix([i64; 4]);

impl Element for Matrix {
    fn datatype() -> Datatype {
        Datatype::opaque::<Matrix>()
    }
}

fn matmul() -> Operator<Matrix> {
    Operator::non_commutative(|Matrix(a): &Matrix, Matrix(b): &Matrix| {
        Matrix([
            a[0] * b[0] + a[1] * b[2],
            a[0] * b[1] + a[1] * b[3],
            a[2] * b[0] + a[3] * b[2],
            a[2] * b[1] + a[3] * b[3],
        ])
    })
}

fn layout() -> impl Strategy<Value = NodeMap> {
    prop_oneof![
        prop::collection::vec(1usize..=4, 1..=4).prop_map(|sizes| NodeMap::blocks(&sizes).unwrap()),
        (1usize..=12, 1usize..=4)
            .prop_map(|(size, nodes)| NodeMap::round_robin(size, nodes).unwrap()),
        prop::collection::vec(0usize..3, 1..=12).prop_map(|labels| NodeMap::new(labels).unwrap()),
    ]
}

fn algorithm() -> impl Strategy<Value = AlgorithmChoice> {
    prop_oneof![
        Just(AlgorithmChoice::Auto),
        Just(AlgorithmChoice::Flat),
        Just(AlgorithmChoice::Hierarchical),
    ]
}

fn scan_all<T, F>(nodes: &NodeMap, algorithm: AlgorithmChoice, op: &Operator<T>, input: F) -> Vec<T>
where
    T: Element + Sync,
    F: Fn(usize) -> T + Sync,
{
    let fabric = Fabric::with_nodes(nodes.clone()).with_config(ScanConfig {
        algorithm,
        ..ScanConfig::default()
    });
    let results = fabric
        .run(|world, engine| world.scan_scalar(&engine, input(world.rank()), op).unwrap())
        .unwrap();
    assert_eq!(fabric.pending_messages(), 0);
    results
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn matrix_products_follow_rank_order(nodes in layout(), algorithm in algorithm(), seed in 0i64..5) {
        let input = |rank: usize| -> Matrix {
            let r = rank as i64 + seed;
            Matrix([1, r % 3, (r + 1) % 2, 1])
        };
        let got = scan_all(&nodes, algorithm, &matmul(), input);

        let op = matmul();
        let mut acc = input(0);
        let mut expected = vec![acc];
        for rank in 1..nodes.len() {
            acc = op.combine(&acc, &input(rank));
            expected.push(acc);
        }
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn concatenation_matches_sequential_fold(nodes in layout(), algorithm in algorithm()) {
        let word = |rank: usize| format!("{rank},");
        let got = scan_all(&nodes, algorithm, &Operator::concat(), word);
        let expected: Vec<String> = (0..nodes.len())
            .map(|r| (0..=r).map(word).collect())
            .collect();
        prop_assert_eq!(got, expected);
    }
}
