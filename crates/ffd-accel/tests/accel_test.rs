use burn_ndarray::NdArray;
use ffd_accel::kernels::{approx_bending_energy, evaluate_deformation_field, jacobian_penalty};
use ffd_accel::{
    AccelConfig, CapabilityTier, ComputeCapability, ComputeDevice, ConfigError, DeviceField, DeviceGrid, DeviceMask,
    DeviceProfile, KernelId, TuningTable,
};
use ffd_core::{BasisKind, ControlPointGrid, FieldGeometry, Mask, Spacing, VectorField};
use ffd_registration::JacobianMode;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Backend = NdArray<f32>;

fn random_grid(seed: u64) -> (FieldGeometry<3>, ControlPointGrid<3>) {
    let reference = FieldGeometry::<3>::axis_aligned([9, 8, 7], 1.0).unwrap();
    let mut grid = ControlPointGrid::for_field(&reference, Spacing::uniform(3.0)).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    grid.to_displacement();
    for value in grid.lattice_mut().data_mut() {
        *value = [
            rng.random_range(-0.5..0.5),
            rng.random_range(-0.5..0.5),
            rng.random_range(-0.5..0.5),
        ];
    }
    grid.to_deformation();
    (reference, grid)
}

/// Tuning table with one tiny group size for every kernel of the given tier.
fn tiny_tuning(tier: CapabilityTier) -> TuningTable {
    let mut table = TuningTable::embedded().unwrap();
    for kernel in KernelId::ALL {
        table.set_group_size(tier, kernel, 7);
    }
    table
}

#[test]
fn test_tuning_file_override_spans_many_waves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("block_sizes.json");
    std::fs::write(&path, tiny_tuning(CapabilityTier::Sm20).to_json().unwrap()).unwrap();

    let profile = DeviceProfile::default().with_resident_groups(2);
    let config = AccelConfig::new(profile, TuningTable::embedded().unwrap())
        .with_tuning_file(&path)
        .unwrap();
    let device = ComputeDevice::<Backend>::select(Default::default(), &config).unwrap();
    assert_eq!(device.group_size(KernelId::SplineDeformationField3D), Some(7));

    let (reference, grid) = random_grid(11);
    let mask = Mask::full(reference.voxel_count());
    let mut host = VectorField::identity(reference.clone());
    ffd_core::evaluate_deformation_field(&grid, &mut host, &mask, false, BasisKind::CubicBSpline).unwrap();

    let mirror = DeviceGrid::upload(&device, &grid).unwrap();
    let mut field = DeviceField::identity(&device, reference.clone()).unwrap();
    let dmask = DeviceMask::full(&device, reference.voxel_count());
    evaluate_deformation_field(&device, &mirror, &mut field, &dmask, false, BasisKind::CubicBSpline).unwrap();
    let result = field.download(&device).unwrap();

    let diff = ffd_registration::max_field_difference(&result, &host).unwrap();
    assert!(diff < 5e-4, "max difference {}", diff);
}

#[test]
fn test_missing_tier_is_rejected() {
    let mut table = TuningTable::embedded().unwrap();
    table.remove_tier(CapabilityTier::Sm12);
    let config = AccelConfig::new(DeviceProfile::default(), table).with_capability(ComputeCapability::new(1, 2));
    let err = ComputeDevice::<Backend>::select(Default::default(), &config).unwrap_err();
    assert!(matches!(err, ConfigError::MissingTier(CapabilityTier::Sm12)), "{:?}", err);
}

#[test]
fn test_results_do_not_depend_on_tier() {
    let (reference, grid) = random_grid(5);
    let mask = Mask::full(reference.voxel_count());
    let mut values = Vec::new();
    for capability in ["1.1", "1.3", "3.5"] {
        let capability: ComputeCapability = capability.parse().unwrap();
        let config = AccelConfig::embedded().unwrap().with_capability(capability);
        let device = ComputeDevice::<Backend>::select(Default::default(), &config).unwrap();
        let mirror = DeviceGrid::upload(&device, &grid).unwrap();
        let dmask = DeviceMask::upload(&device, &mask).unwrap();
        let energy = approx_bending_energy(&device, &mirror).unwrap();
        let penalty = jacobian_penalty(&device, &mirror, &reference, &dmask, JacobianMode::Exact).unwrap();
        values.push((energy, penalty.value));
    }
    for (energy, penalty) in &values[1..] {
        assert!((energy - values[0].0).abs() <= 1e-5 * values[0].0.abs().max(1.0));
        assert!((penalty - values[0].1).abs() <= 1e-5 * values[0].1.abs().max(1.0));
    }
}
