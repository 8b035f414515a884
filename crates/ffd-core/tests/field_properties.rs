use ffd_core::field::{ControlPointGrid, FieldGeometry, Mask, Representation, VectorField};
use ffd_core::spatial::Spacing;
use ffd_core::spline::{evaluate_deformation_field, BasisKind};
use ffd_core::transform::{compose_fields, exponentiate_velocity, square};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn random_grid(geometry: &FieldGeometry<2>, spacing: f64, amplitude: f32, seed: u64) -> ControlPointGrid<2> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut grid = ControlPointGrid::for_field(geometry, Spacing::uniform(spacing)).unwrap();
    grid.to_displacement();
    for v in grid.lattice_mut().data_mut() {
        *v = [
            (rng.random::<f32>() - 0.5) * amplitude,
            (rng.random::<f32>() - 0.5) * amplitude,
        ];
    }
    grid.to_deformation();
    grid
}

/// Field whose displacement is the affine map `a · x + t`.
fn affine_field(geometry: &FieldGeometry<2>, a: [[f64; 2]; 2], t: [f64; 2]) -> VectorField<2> {
    let mut field = VectorField::zeros(geometry.clone(), Representation::Displacement);
    for voxel in 0..field.len() {
        let p = geometry.rest_position(voxel);
        let d = nalgebra::SVector::<f64, 2>::new(
            a[0][0] * p[0] + a[0][1] * p[1] + t[0],
            a[1][0] * p[0] + a[1][1] * p[1] + t[1],
        );
        field.set_vector(voxel, &d);
    }
    field.to_deformation();
    field
}

fn max_difference(a: &VectorField<2>, b: &VectorField<2>, voxels: impl Iterator<Item = usize>) -> f32 {
    voxels
        .flat_map(|v| (0..2).map(move |c| (v, c)))
        .map(|(v, c)| (a.data()[v][c] - b.data()[v][c]).abs())
        .fold(0.0, f32::max)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_displacement_deformation_round_trip(seed in any::<u64>()) {
        let geometry = FieldGeometry::<2>::axis_aligned([17, 13], 1.5).unwrap();
        let grid = random_grid(&geometry, 4.0, 5.0, seed);
        let mut lattice = grid.lattice().clone();
        let original = lattice.clone();

        lattice.to_displacement();
        lattice.to_deformation();

        let diff = max_difference(&lattice, &original, 0..original.len());
        prop_assert!(diff < 1e-5, "Round trip drift too high: {}", diff);
    }

    #[test]
    fn test_evaluation_ignores_mask_order(seed in any::<u64>()) {
        let geometry = FieldGeometry::<2>::axis_aligned([20, 15], 1.0).unwrap();
        let grid = random_grid(&geometry, 5.0, 5.0, seed);

        let mut indices: Vec<usize> = (0..geometry.voxel_count()).filter(|v| v % 3 != 0).collect();
        let ordered = Mask::from_indices(indices.clone(), geometry.voxel_count()).unwrap();
        indices.shuffle(&mut StdRng::seed_from_u64(seed ^ 0x5eed));
        let shuffled = Mask::from_indices(indices, geometry.voxel_count()).unwrap();

        let mut a = VectorField::identity(geometry.clone());
        let mut b = VectorField::identity(geometry);
        evaluate_deformation_field(&grid, &mut a, &ordered, false, BasisKind::CubicBSpline).unwrap();
        evaluate_deformation_field(&grid, &mut b, &shuffled, false, BasisKind::CubicBSpline).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn test_composition_is_associative(
        a in prop::array::uniform4(-0.02f64..0.02),
        b in prop::array::uniform4(-0.02f64..0.02),
        c in prop::array::uniform4(-0.02f64..0.02),
        t in prop::array::uniform6(-1.0f64..1.0),
    ) {
        let geometry = FieldGeometry::<2>::axis_aligned([24, 24], 1.0).unwrap();
        let fa = affine_field(&geometry, [[a[0], a[1]], [a[2], a[3]]], [t[0], t[1]]);
        let fb = affine_field(&geometry, [[b[0], b[1]], [b[2], b[3]]], [t[2], t[3]]);
        let fc = affine_field(&geometry, [[c[0], c[1]], [c[2], c[3]]], [t[4], t[5]]);
        let mask = Mask::full(geometry.voxel_count());

        // C ∘ (B ∘ A)
        let mut left = fa.clone();
        compose_fields(&fb, &mut left, &mask).unwrap();
        compose_fields(&fc, &mut left, &mask).unwrap();

        // (C ∘ B) ∘ A
        let mut cb = fb.clone();
        compose_fields(&fc, &mut cb, &mask).unwrap();
        let mut right = fa.clone();
        compose_fields(&cb, &mut right, &mask).unwrap();

        // every sampled position stays inside the lattice away from the border
        let interior = (0..geometry.voxel_count()).filter(|&v| {
            let [x, y] = geometry.lattice_index(v);
            (6..18).contains(&x) && (6..18).contains(&y)
        });
        let diff = max_difference(&left, &right, interior);
        prop_assert!(2.0 * diff < 5e-4, "Associativity difference too high: {}", diff);
    }

    #[test]
    fn test_exponentiation_is_repeated_self_composition(seed in any::<u64>(), steps in 1u32..7) {
        let geometry = FieldGeometry::<2>::axis_aligned([18, 14], 1.0).unwrap();
        let velocity = random_grid(&geometry, 5.0, 5.0, seed).into_velocity(steps);
        let mask = Mask::full(geometry.voxel_count());

        let mut exponentiated = VectorField::identity(geometry.clone());
        exponentiate_velocity(&velocity, &mut exponentiated).unwrap();

        let mut single_step = velocity.clone();
        single_step.set_parametrization(ffd_core::Parametrization::Displacement);
        single_step.to_displacement();
        single_step.lattice_mut().scale(1.0 / (1u32 << steps) as f32);

        let mut composed = VectorField::identity(geometry);
        evaluate_deformation_field(&single_step, &mut composed, &mask, false, BasisKind::CubicBSpline).unwrap();
        square(&mut composed, steps, &mask).unwrap();

        let diff = max_difference(&exponentiated, &composed, 0..mask.len());
        prop_assert!(2.0 * diff < 5e-4, "Exponentiation difference too high: {}", diff);
    }
}

#[test]
fn test_velocity_grid_routes_through_exponentiation() {
    let geometry = FieldGeometry::<2>::axis_aligned([16, 12], 1.0).unwrap();
    let velocity = random_grid(&geometry, 4.0, 3.0, 7).into_velocity(6);
    let mask = Mask::full(geometry.voxel_count());

    let mut via_evaluation = VectorField::identity(geometry.clone());
    evaluate_deformation_field(&velocity, &mut via_evaluation, &mask, false, BasisKind::CubicBSpline).unwrap();

    let mut direct = VectorField::identity(geometry);
    exponentiate_velocity(&velocity, &mut direct).unwrap();

    assert_eq!(via_evaluation, direct);
}
