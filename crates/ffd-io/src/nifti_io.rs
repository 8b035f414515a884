//! NIfTI storage of vector fields and control-point grids.
//!
//! Vectors are stored as 5-D volumes `(nx, ny, nz, 1, D)` (`nz = 1` in 2D)
//! with the sform taken from the lattice geometry. The intent code tags the
//! payload: plain fields and grids use the displacement-vector code with
//! `intent_p1` holding the representation, velocity grids use the vector code
//! and [`VELOCITY_INTENT_NAME`] with `intent_p1` holding the squaring steps and
//! `intent_p2` the representation.

use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use ffd_core::{
    ControlPointGrid, Direction, FieldGeometry, Parametrization, Point, Representation, Spacing, VectorField,
};
use nalgebra::{Matrix3, SMatrix, Vector3};
use ndarray::{Array5, Ix5};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use tracing::debug;

/// Intent code of plain displacement or deformation payloads.
pub const INTENT_DISPLACEMENT_VECTOR: i16 = 1006;
/// Intent code of velocity-parametrized control-point grids.
pub const INTENT_VECTOR: i16 = 1007;
/// Intent name marking a velocity grid.
pub const VELOCITY_INTENT_NAME: &str = "NREG_VEL_STEP";

/// Payload tag carried in the intent fields.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Tag {
    Vectors(Representation),
    Velocity { squaring_steps: u32, representation: Representation },
}

impl Tag {
    fn apply(self, header: &mut NiftiHeader) {
        match self {
            Tag::Vectors(representation) => {
                header.intent_code = INTENT_DISPLACEMENT_VECTOR;
                header.intent_p1 = representation_code(representation);
                header.intent_p2 = 0.0;
                header.intent_name = [0; 16];
            }
            Tag::Velocity {
                squaring_steps,
                representation,
            } => {
                header.intent_code = INTENT_VECTOR;
                header.intent_p1 = squaring_steps as f32;
                header.intent_p2 = representation_code(representation);
                let mut name = [0u8; 16];
                name[..VELOCITY_INTENT_NAME.len()].copy_from_slice(VELOCITY_INTENT_NAME.as_bytes());
                header.intent_name = name;
            }
        }
    }

    fn read(header: &NiftiHeader) -> Result<Self> {
        match header.intent_code {
            INTENT_DISPLACEMENT_VECTOR => Ok(Tag::Vectors(representation_from_code(header.intent_p1)?)),
            INTENT_VECTOR => {
                let name = intent_name(header);
                ensure!(
                    name == VELOCITY_INTENT_NAME,
                    "vector intent without velocity tag (intent name '{}')",
                    name
                );
                ensure!(
                    header.intent_p1.is_finite() && header.intent_p1 >= 0.0,
                    "invalid squaring step count {}",
                    header.intent_p1
                );
                Ok(Tag::Velocity {
                    squaring_steps: header.intent_p1.round() as u32,
                    representation: representation_from_code(header.intent_p2)?,
                })
            }
            code => bail!("unsupported intent code {} for a vector payload", code),
        }
    }
}

fn representation_code(representation: Representation) -> f32 {
    match representation {
        Representation::Displacement => 0.0,
        Representation::Deformation => 1.0,
    }
}

fn representation_from_code(code: f32) -> Result<Representation> {
    match code.round() as i32 {
        0 => Ok(Representation::Displacement),
        1 => Ok(Representation::Deformation),
        other => bail!("unknown field representation code {}", other),
    }
}

fn intent_name(header: &NiftiHeader) -> String {
    let end = header.intent_name.iter().position(|&b| b == 0).unwrap_or(header.intent_name.len());
    String::from_utf8_lossy(&header.intent_name[..end]).into_owned()
}

/// Write a vector field, tagged with its representation.
pub fn write_vector_field<P: AsRef<Path>, const D: usize>(path: P, field: &VectorField<D>) -> Result<()> {
    write_lattice(path.as_ref(), field, Tag::Vectors(field.representation()))
}

/// Read a vector field written by [`write_vector_field`].
pub fn read_vector_field<P: AsRef<Path>, const D: usize>(path: P) -> Result<VectorField<D>> {
    let path = path.as_ref();
    let (tag, field) = read_lattice::<D>(path)?;
    match tag {
        Tag::Vectors(_) => Ok(field),
        Tag::Velocity { .. } => bail!("{} holds a velocity grid, not a vector field", path.display()),
    }
}

/// Write a control-point grid; velocity grids carry their squaring steps.
pub fn write_control_point_grid<P: AsRef<Path>, const D: usize>(path: P, grid: &ControlPointGrid<D>) -> Result<()> {
    let tag = match grid.parametrization() {
        Parametrization::Displacement => Tag::Vectors(grid.representation()),
        Parametrization::Velocity { squaring_steps } => Tag::Velocity {
            squaring_steps,
            representation: grid.representation(),
        },
    };
    write_lattice(path.as_ref(), grid.lattice(), tag)
}

/// Read a control-point grid written by [`write_control_point_grid`].
pub fn read_control_point_grid<P: AsRef<Path>, const D: usize>(path: P) -> Result<ControlPointGrid<D>> {
    let (tag, lattice) = read_lattice::<D>(path.as_ref())?;
    let parametrization = match tag {
        Tag::Vectors(_) => Parametrization::Displacement,
        Tag::Velocity { squaring_steps, .. } => Parametrization::Velocity { squaring_steps },
    };
    Ok(ControlPointGrid::new(lattice, parametrization))
}

fn write_lattice<const D: usize>(path: &Path, field: &VectorField<D>, tag: Tag) -> Result<()> {
    let geometry = field.geometry();
    let shape = geometry.shape();
    let nx = shape[0];
    let ny = shape[1];
    let nz = if D == 3 { shape[2] } else { 1 };

    let mut header = NiftiHeader::default();
    let (linear, origin) = embed_affine(geometry);
    header.pixdim = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
    for a in 0..D {
        header.pixdim[a + 1] = geometry.spacing()[a] as f32;
    }
    header.sform_code = 1;
    header.qform_code = 0;
    let row = |r: usize| -> [f32; 4] {
        [
            linear[(r, 0)] as f32,
            linear[(r, 1)] as f32,
            linear[(r, 2)] as f32,
            origin[r] as f32,
        ]
    };
    header.srow_x = row(0);
    header.srow_y = row(1);
    header.srow_z = row(2);
    tag.apply(&mut header);

    let data = field.data();
    let volume = Array5::from_shape_fn((nx, ny, nz, 1, D), |(x, y, z, _, c)| data[x + nx * (y + ny * z)][c]);

    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&volume)
        .with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), ?tag, shape = ?shape, "wrote vector lattice");
    Ok(())
}

fn read_lattice<const D: usize>(path: &Path) -> Result<(Tag, VectorField<D>)> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let header = obj.header().clone();
    let tag = Tag::read(&header)?;

    ensure!(header.dim[0] == 5, "expected a 5-D vector volume, found {} dimensions", header.dim[0]);
    let nx = header.dim[1] as usize;
    let ny = header.dim[2] as usize;
    let nz = header.dim[3] as usize;
    let components = header.dim[5] as usize;
    ensure!(header.dim[4] == 1, "vector volumes carry a single time point, found {}", header.dim[4]);
    ensure!(components == D, "expected {} vector components, found {}", D, components);
    ensure!(D == 3 || nz == 1, "a 2D lattice needs nz = 1, found {}", nz);

    let mut shape = [0usize; D];
    shape[0] = nx;
    shape[1] = ny;
    if D == 3 {
        shape[2] = nz;
    }
    let geometry = geometry_from_header::<D>(&header, shape)?;

    let volume = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("failed to convert volume to ndarray")?
        .into_dimensionality::<Ix5>()
        .context("vector volume is not 5-D")?;
    let mut data = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                data.push(std::array::from_fn(|c| volume[[x, y, z, 0, c]]));
            }
        }
    }

    let representation = match tag {
        Tag::Vectors(representation) | Tag::Velocity { representation, .. } => representation,
    };
    let field = VectorField::new(geometry, data, representation)?;
    debug!(path = %path.display(), ?tag, shape = ?shape, "read vector lattice");
    Ok((tag, field))
}

/// Index-to-world map of `geometry` lifted to three dimensions.
fn embed_affine<const D: usize>(geometry: &FieldGeometry<D>) -> (Matrix3<f64>, Vector3<f64>) {
    let mut linear = Matrix3::identity();
    let mut origin = Vector3::zeros();
    let m = geometry.index_to_world_matrix();
    for r in 0..D {
        origin[r] = geometry.origin().coords()[r];
        for c in 0..D {
            linear[(r, c)] = m[(r, c)];
        }
    }
    (linear, origin)
}

/// Voxel-to-world map from the sform, the qform or the voxel sizes, in that order.
fn header_affine(header: &NiftiHeader) -> (Matrix3<f64>, Vector3<f64>) {
    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        let linear = Matrix3::from_fn(|r, c| f64::from(rows[r][c]));
        let origin = Vector3::from_fn(|r, _| f64::from(rows[r][3]));
        return (linear, origin);
    }
    let dx = f64::from(header.pixdim[1]);
    let dy = f64::from(header.pixdim[2]);
    let dz = f64::from(header.pixdim[3]);
    if header.qform_code > 0 {
        let b = f64::from(header.quatern_b);
        let c = f64::from(header.quatern_c);
        let d = f64::from(header.quatern_d);
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let rotation = Matrix3::new(
            a * a + b * b - c * c - d * d,
            2.0 * (b * c - a * d),
            2.0 * (b * d + a * c),
            2.0 * (b * c + a * d),
            a * a + c * c - b * b - d * d,
            2.0 * (c * d - a * b),
            2.0 * (b * d - a * c),
            2.0 * (c * d + a * b),
            a * a + d * d - c * c - b * b,
        );
        let linear = rotation * Matrix3::from_diagonal(&Vector3::new(dx, dy, dz * qfac));
        let origin = Vector3::new(
            f64::from(header.quatern_x),
            f64::from(header.quatern_y),
            f64::from(header.quatern_z),
        );
        return (linear, origin);
    }
    (Matrix3::from_diagonal(&Vector3::new(dx, dy, dz)), Vector3::zeros())
}

fn geometry_from_header<const D: usize>(header: &NiftiHeader, shape: [usize; D]) -> Result<FieldGeometry<D>> {
    let (linear, origin) = header_affine(header);
    let mut spacing = Spacing::<D>::zeros();
    let mut direction = SMatrix::<f64, D, D>::identity();
    for c in 0..D {
        let column = Vector3::from_fn(|r, _| if r < D { linear[(r, c)] } else { 0.0 });
        let norm = column.norm();
        ensure!(norm > 1e-9, "degenerate voxel axis {} in header", c);
        spacing[c] = norm;
        for r in 0..D {
            direction[(r, c)] = column[r] / norm;
        }
    }
    let origin = Point::new(std::array::from_fn(|a| origin[a]));
    Ok(FieldGeometry::new(shape, origin, spacing, Direction(direction))?)
}
