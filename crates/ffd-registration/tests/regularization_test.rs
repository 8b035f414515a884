use ffd_core::{ControlPointGrid, FieldGeometry, Mask, Representation, Spacing, VectorField};
use ffd_registration::regularization::{
    approx_bending_energy, correct_folding_until_valid, jacobian_determinants, jacobian_penalty,
    BendingEnergyRegularizer, JacobianMode, JacobianRegularizer, Regularizer,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_grid(seed: u64, amplitude: f32) -> (FieldGeometry<3>, ControlPointGrid<3>) {
    let reference = FieldGeometry::<3>::axis_aligned([12, 12, 12], 1.0).unwrap();
    let mut grid = ControlPointGrid::for_field(&reference, Spacing::uniform(4.0)).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    grid.to_displacement();
    for value in grid.lattice_mut().data_mut().iter_mut() {
        for c in value.iter_mut() {
            *c = rng.random_range(-amplitude..amplitude);
        }
    }
    grid.to_deformation();
    (reference, grid)
}

#[test]
fn test_small_random_grid_is_not_folded() {
    let (reference, grid) = random_grid(7, 0.2);
    let mask = Mask::full(reference.voxel_count());
    for mode in [JacobianMode::Approximate, JacobianMode::Exact] {
        let term = jacobian_penalty(&grid, &reference, &mask, mode).unwrap();
        assert_eq!(term.folded_sites, 0);
        assert!(term.value > 0.0 && term.value < 1.0, "{:?}: {}", mode, term.value);
    }
}

#[test]
fn test_exact_sites_follow_the_mask() {
    let (reference, grid) = random_grid(11, 0.5);
    let full = Mask::full(reference.voxel_count());
    let subset = Mask::from_indices(vec![5, 300, 1200], reference.voxel_count()).unwrap();

    let all = jacobian_determinants(&grid, &reference, &full, JacobianMode::Exact).unwrap();
    let picked = jacobian_determinants(&grid, &reference, &subset, JacobianMode::Exact).unwrap();
    assert_eq!(all.len(), reference.voxel_count());
    assert_eq!(picked, vec![all[5], all[300], all[1200]]);
}

#[test]
fn test_regularizers_share_one_gradient_buffer() {
    let (reference, grid) = random_grid(3, 0.5);
    let regularizers: Vec<Box<dyn Regularizer<3>>> = vec![
        Box::new(BendingEnergyRegularizer::new(0.5)),
        Box::new(JacobianRegularizer::new(0.5, JacobianMode::Approximate, reference.clone())),
    ];

    let mut combined = VectorField::zeros(grid.geometry().clone(), Representation::Displacement);
    for regularizer in &regularizers {
        regularizer.add_gradient(&grid, &mut combined).unwrap();
    }

    let mut separate = Vec::new();
    for regularizer in &regularizers {
        let mut gradient = VectorField::zeros(grid.geometry().clone(), Representation::Displacement);
        regularizer.add_gradient(&grid, &mut gradient).unwrap();
        separate.push(gradient);
    }

    for node in 0..grid.node_count() {
        let expected = separate[0].vector(node) + separate[1].vector(node);
        let actual = combined.vector(node);
        assert!((expected - actual).norm() < 1e-5 * (1.0 + expected.norm()));
    }
    assert!(regularizers[0].penalty(&grid).unwrap() > 0.0);
    assert_eq!(approx_bending_energy(&grid), regularizers[0].penalty(&grid).unwrap());
}

#[test]
fn test_folding_correction_on_large_displacements() {
    let (reference, mut grid) = random_grid(5, 6.0);
    let mask = Mask::full(reference.voxel_count());
    let before = jacobian_penalty(&grid, &reference, &mask, JacobianMode::Approximate).unwrap();
    assert!(before.is_folded());

    let original = grid.clone();
    let report = correct_folding_until_valid(&mut grid, &reference, &mask, JacobianMode::Approximate, 100).unwrap();
    let after = jacobian_penalty(&grid, &reference, &mask, JacobianMode::Approximate).unwrap();
    assert!(report.iterations > 0);
    assert!(report.iterations <= 100);
    assert_eq!(report.folded_sites, after.folded_sites);
    assert_ne!(grid, original);
}
