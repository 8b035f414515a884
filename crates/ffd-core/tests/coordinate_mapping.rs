use ffd_core::field::{ControlPointGrid, FieldGeometry};
use ffd_core::spatial::{Direction, Point, Spacing};
use nalgebra::SVector;
use proptest::prelude::*;

const D: usize = 3;

fn make_rotation(angle_x: f64, angle_y: f64, angle_z: f64) -> Direction<D> {
    let (sx, cx) = angle_x.sin_cos();
    let (sy, cy) = angle_y.sin_cos();
    let (sz, cz) = angle_z.sin_cos();

    let rz = nalgebra::SMatrix::<f64, 3, 3>::new(
        cz, -sz, 0.0,
        sz, cz, 0.0,
        0.0, 0.0, 1.0
    );
    let ry = nalgebra::SMatrix::<f64, 3, 3>::new(
        cy, 0.0, sy,
        0.0, 1.0, 0.0,
        -sy, 0.0, cy
    );
    let rx = nalgebra::SMatrix::<f64, 3, 3>::new(
        1.0, 0.0, 0.0,
        0.0, cx, -sx,
        0.0, sx, cx
    );

    Direction(rx * ry * rz)
}

proptest! {
    #[test]
    fn test_coordinate_roundtrip(
        ox in -100.0f64..100.0, oy in -100.0f64..100.0, oz in -100.0f64..100.0,
        sx in 0.1f64..5.0, sy in 0.1f64..5.0, sz in 0.1f64..5.0,
        ax in -3.14f64..3.14, ay in -3.14f64..3.14, az in -3.14f64..3.14,
        px in -50.0f64..50.0, py in -50.0f64..50.0, pz in -50.0f64..50.0
    ) {
        let geometry = FieldGeometry::new(
            [2, 2, 2],
            Point::new([ox, oy, oz]),
            Spacing::new([sx, sy, sz]),
            make_rotation(ax, ay, az),
        ).unwrap();

        let p = SVector::<f64, D>::new(px, py, pz);
        let index = geometry.world_to_index(&p);
        let back = geometry.index_to_world(&index);

        prop_assert!((back - p).amax() < 1e-9, "Roundtrip mismatch: got {}, expected {}", back, p);
    }

    #[test]
    fn test_grid_places_field_origin_at_lattice_one(
        ox in -100.0f64..100.0, oy in -100.0f64..100.0, oz in -100.0f64..100.0,
        sx in 0.5f64..3.0, sy in 0.5f64..3.0, sz in 0.5f64..3.0,
        ax in -3.14f64..3.14, ay in -3.14f64..3.14, az in -3.14f64..3.14,
        cp in 2.0f64..10.0
    ) {
        let field = FieldGeometry::new(
            [9, 7, 5],
            Point::new([ox, oy, oz]),
            Spacing::new([sx, sy, sz]),
            make_rotation(ax, ay, az),
        ).unwrap();
        let grid = ControlPointGrid::for_field(&field, Spacing::uniform(cp)).unwrap();
        let lattice = grid.geometry();

        let first = lattice.world_to_index(&field.rest_position(0));
        prop_assert!((first - SVector::<f64, D>::repeat(1.0)).amax() < 1e-9);

        // the last voxel keeps a full cubic stencil inside the lattice
        let last = lattice.world_to_index(&field.rest_position(field.voxel_count() - 1));
        for axis in 0..D {
            prop_assert!(last[axis].floor() + 2.0 <= (lattice.shape()[axis] - 1) as f64);
        }
    }
}
