//! Binary little-endian PLY snapshots of a scene.
//!
//! Gaussians are stored as `element vertex` with the usual splat property
//! names (`x y z f_dc_* f_rest_* opacity scale_* rot_*`); triangles as
//! `element triangle` with `x0 .. z2 f_dc_* f_rest_* opacity smoothness`.
//! Values are the raw optimizer parameters (logits, log-scales, raw
//! quaternions), so a save/load round trip is bit-exact. `f_rest` keeps the
//! in-memory `M × 3` order, announced by `comment features_rest_shape M 3`.

use crate::core::sh::{num_sh_rest, MAX_SH_DEGREE};
use crate::core::{GaussianCloud, PrimitiveStore, Scene, TriangleSoup};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed PLY header: {0}")]
    MalformedHeader(String),

    #[error("unexpected property: expected {expected}, found {found}")]
    UnexpectedProperty { expected: String, found: String },

    #[error("no SH degree has {0} rest coefficients")]
    UnsupportedShRest(usize),

    #[error("{group} holds {found} values, expected {expected}")]
    LengthMismatch {
        group: &'static str,
        expected: usize,
        found: usize,
    },
}

const GAUSSIAN_ELEMENT: &str = "vertex";
const TRIANGLE_ELEMENT: &str = "triangle";

fn indexed(prefix: &str, count: usize) -> impl Iterator<Item = String> + '_ {
    (0..count).map(move |i| format!("{prefix}{i}"))
}

fn gaussian_properties(rest: usize) -> Vec<String> {
    ["x", "y", "z"]
        .into_iter()
        .map(String::from)
        .chain(indexed("f_dc_", 3))
        .chain(indexed("f_rest_", rest * 3))
        .chain(std::iter::once("opacity".to_string()))
        .chain(indexed("scale_", 3))
        .chain(indexed("rot_", 4))
        .collect()
}

fn triangle_properties(rest: usize) -> Vec<String> {
    (0..3)
        .flat_map(|v| ["x", "y", "z"].into_iter().map(move |a| format!("{a}{v}")))
        .chain(indexed("f_dc_", 3))
        .chain(indexed("f_rest_", rest * 3))
        .chain(["opacity".to_string(), "smoothness".to_string()])
        .collect()
}

/// Column widths of one record in file order, matching the property lists.
fn gaussian_widths(rest: usize) -> [usize; 6] {
    [3, 3, rest * 3, 1, 3, 4]
}

fn triangle_widths(rest: usize) -> [usize; 5] {
    [9, 3, rest * 3, 1, 1]
}

fn check_len(group: &'static str, values: &[f32], expected: usize) -> Result<(), SnapshotError> {
    if values.len() != expected {
        return Err(SnapshotError::LengthMismatch {
            group,
            expected,
            found: values.len(),
        });
    }
    Ok(())
}

fn write_header<W: Write>(w: &mut W, element: &str, count: usize, rest: usize, properties: &[String]) -> std::io::Result<()> {
    writeln!(w, "ply")?;
    writeln!(w, "format binary_little_endian 1.0")?;
    writeln!(w, "comment features_rest_shape {rest} 3")?;
    writeln!(w, "element {element} {count}")?;
    for p in properties {
        writeln!(w, "property float {p}")?;
    }
    writeln!(w, "end_header")
}

/// Interleave per-group arrays into records.
fn write_rows<W: Write>(w: &mut W, groups: &[&[f32]], widths: &[usize], count: usize) -> std::io::Result<()> {
    for i in 0..count {
        for (values, &width) in groups.iter().zip(widths) {
            for &v in &values[i * width..(i + 1) * width] {
                w.write_f32::<LittleEndian>(v)?;
            }
        }
    }
    Ok(())
}

/// Preallocation cap; the header count is untrusted until the body is read.
const MAX_PREALLOCATED_RECORDS: usize = 1 << 16;

/// Split `count` records back into per-group arrays.
fn read_rows<R: BufRead>(r: &mut R, widths: &[usize], count: usize) -> Result<Vec<Vec<f32>>, SnapshotError> {
    let stride: usize = widths.iter().sum::<usize>() * std::mem::size_of::<f32>();
    count
        .checked_mul(stride)
        .ok_or_else(|| malformed(format!("element count {count} overflows the body size")))?;

    let reserve = count.min(MAX_PREALLOCATED_RECORDS);
    let mut groups: Vec<Vec<f32>> = widths.iter().map(|w| Vec::with_capacity(w * reserve)).collect();
    for _ in 0..count {
        for (group, &width) in groups.iter_mut().zip(widths) {
            for _ in 0..width {
                group.push(r.read_f32::<LittleEndian>()?);
            }
        }
    }
    Ok(groups)
}

pub fn write_gaussians<W: Write>(w: &mut W, cloud: &GaussianCloud) -> Result<(), SnapshotError> {
    let n = cloud.len();
    let rest = cloud.sh_rest_len();
    check_len("positions", &cloud.positions, n * 3)?;
    check_len("sh_dc", &cloud.sh_dc, n * 3)?;
    check_len("sh_rest", &cloud.sh_rest, n * rest * 3)?;
    check_len("log_scales", &cloud.log_scales, n * 3)?;
    check_len("rotations", &cloud.rotations, n * 4)?;

    write_header(w, GAUSSIAN_ELEMENT, n, rest, &gaussian_properties(rest))?;
    let groups: [&[f32]; 6] = [
        &cloud.positions,
        &cloud.sh_dc,
        &cloud.sh_rest,
        &cloud.opacity_logits,
        &cloud.log_scales,
        &cloud.rotations,
    ];
    write_rows(w, &groups, &gaussian_widths(rest), n)?;
    Ok(())
}

pub fn write_triangles<W: Write>(w: &mut W, soup: &TriangleSoup) -> Result<(), SnapshotError> {
    let n = soup.len();
    let rest = soup.sh_rest_len();
    check_len("vertices", &soup.vertices, n * 9)?;
    check_len("sh_dc", &soup.sh_dc, n * 3)?;
    check_len("sh_rest", &soup.sh_rest, n * rest * 3)?;
    check_len("log_smoothness", &soup.log_smoothness, n)?;

    write_header(w, TRIANGLE_ELEMENT, n, rest, &triangle_properties(rest))?;
    let groups: [&[f32]; 5] = [
        &soup.vertices,
        &soup.sh_dc,
        &soup.sh_rest,
        &soup.opacity_logits,
        &soup.log_smoothness,
    ];
    write_rows(w, &groups, &triangle_widths(rest), n)?;
    Ok(())
}

pub fn write_scene<W: Write>(w: &mut W, scene: &Scene) -> Result<(), SnapshotError> {
    match scene {
        Scene::Gaussians(cloud) => write_gaussians(w, cloud),
        Scene::Triangles(soup) => write_triangles(w, soup),
    }
}

struct Header {
    element: String,
    count: usize,
    rest_shape: Option<usize>,
    properties: Vec<String>,
}

fn malformed(msg: impl Into<String>) -> SnapshotError {
    SnapshotError::MalformedHeader(msg.into())
}

fn read_header<R: BufRead>(r: &mut R) -> Result<Header, SnapshotError> {
    let mut line = String::new();
    let mut next_line = |r: &mut R| -> Result<String, SnapshotError> {
        line.clear();
        if r.read_line(&mut line)? == 0 {
            return Err(malformed("unexpected end of file"));
        }
        Ok(line.trim_end().to_string())
    };

    if next_line(r)? != "ply" {
        return Err(malformed("missing 'ply' magic"));
    }

    let mut has_format = false;
    let mut element: Option<(String, usize)> = None;
    let mut rest_shape = None;
    let mut properties = Vec::new();
    loop {
        let line = next_line(r)?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["end_header"] => break,
            ["format", fmt, version] => {
                if *fmt != "binary_little_endian" || *version != "1.0" {
                    return Err(malformed(format!("unsupported format '{fmt} {version}'")));
                }
                has_format = true;
            }
            ["comment", "features_rest_shape", m, "3"] => {
                let m: usize = m.parse().map_err(|_| malformed(format!("bad rest shape '{m}'")))?;
                rest_shape = Some(m);
            }
            ["comment", ..] | [] => {}
            ["element", name, count] => {
                if element.is_some() {
                    return Err(malformed("more than one element"));
                }
                let count = count
                    .parse()
                    .map_err(|_| malformed(format!("bad element count '{count}'")))?;
                element = Some((name.to_string(), count));
            }
            ["property", "float", name] => {
                if element.is_none() {
                    return Err(malformed("property before element"));
                }
                properties.push(name.to_string());
            }
            ["property", ty, name] => {
                return Err(malformed(format!("property {name} has type {ty}, expected float")));
            }
            _ => return Err(malformed(format!("unrecognized line '{line}'"))),
        }
    }

    if !has_format {
        return Err(malformed("missing format line"));
    }
    let (element, count) = element.ok_or_else(|| malformed("missing element line"))?;
    Ok(Header {
        element,
        count,
        rest_shape,
        properties,
    })
}

fn sh_degree_for_rest(rest: usize) -> Result<usize, SnapshotError> {
    (0..=MAX_SH_DEGREE)
        .find(|&d| num_sh_rest(d) == rest)
        .ok_or(SnapshotError::UnsupportedShRest(rest))
}

fn check_properties(found: &[String], expected: &[String]) -> Result<(), SnapshotError> {
    for (i, e) in expected.iter().enumerate() {
        match found.get(i) {
            Some(f) if f == e => {}
            other => {
                return Err(SnapshotError::UnexpectedProperty {
                    expected: e.clone(),
                    found: other.cloned().unwrap_or_else(|| "end of header".to_string()),
                })
            }
        }
    }
    if let Some(extra) = found.get(expected.len()) {
        return Err(SnapshotError::UnexpectedProperty {
            expected: "end of header".to_string(),
            found: extra.clone(),
        });
    }
    Ok(())
}

pub fn read_scene<R: BufRead>(r: &mut R) -> Result<Scene, SnapshotError> {
    let header = read_header(r)?;
    let fixed = match header.element.as_str() {
        GAUSSIAN_ELEMENT => 3 + 3 + 1 + 3 + 4,
        TRIANGLE_ELEMENT => 9 + 3 + 1 + 1,
        other => return Err(malformed(format!("unknown element '{other}'"))),
    };
    let rest = match header.rest_shape {
        Some(m) => m,
        None => header.properties.len().saturating_sub(fixed) / 3,
    };
    let sh_degree = sh_degree_for_rest(rest)?;
    let n = header.count;

    if header.element == GAUSSIAN_ELEMENT {
        check_properties(&header.properties, &gaussian_properties(rest))?;
        let mut groups = read_rows(r, &gaussian_widths(rest), n)?.into_iter();
        let mut cloud = GaussianCloud::new(sh_degree);
        let mut take = || groups.next().unwrap_or_default();
        cloud.positions = take();
        cloud.sh_dc = take();
        cloud.sh_rest = take();
        cloud.opacity_logits = take();
        cloud.log_scales = take();
        cloud.rotations = take();
        Ok(Scene::Gaussians(cloud))
    } else {
        check_properties(&header.properties, &triangle_properties(rest))?;
        let mut groups = read_rows(r, &triangle_widths(rest), n)?.into_iter();
        let mut soup = TriangleSoup::new(sh_degree);
        let mut take = || groups.next().unwrap_or_default();
        soup.vertices = take();
        soup.sh_dc = take();
        soup.sh_rest = take();
        soup.opacity_logits = take();
        soup.log_smoothness = take();
        Ok(Scene::Triangles(soup))
    }
}

pub fn save_snapshot(scene: &Scene, path: &Path) -> Result<(), SnapshotError> {
    let mut w = BufWriter::new(File::create(path)?);
    write_scene(&mut w, scene)?;
    w.flush()?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<Scene, SnapshotError> {
    let mut r = BufReader::new(File::open(path)?);
    read_scene(&mut r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Gaussian, Triangle};
    use nalgebra::Vector3;
    use std::io::Cursor;

    fn encode(scene: &Scene) -> Vec<u8> {
        let mut buf = Vec::new();
        write_scene(&mut buf, scene).unwrap();
        buf
    }

    fn header_text(bytes: &[u8]) -> String {
        let end = bytes.windows(11).position(|w| w == b"end_header\n").unwrap() + 11;
        String::from_utf8(bytes[..end].to_vec()).unwrap()
    }

    #[test]
    fn test_gaussian_header_layout() {
        let g = Gaussian::isotropic(Vector3::zeros(), 0.0, 0.0, Vector3::zeros(), 1);
        let scene = Scene::Gaussians(GaussianCloud::from_gaussians(1, &[g.clone(), g]));
        let bytes = encode(&scene);
        let header = header_text(&bytes);
        assert!(header.starts_with("ply\nformat binary_little_endian 1.0\ncomment features_rest_shape 3 3\nelement vertex 2\n"));
        assert!(header.contains("property float f_rest_8\nproperty float opacity\n"));
        assert!(header.ends_with("property float rot_3\nend_header\n"));
        assert_eq!(bytes.len() - header.len(), 2 * (3 + 3 + 9 + 1 + 3 + 4) * 4);
    }

    #[test]
    fn test_triangle_roundtrip_keeps_bits() {
        let t = Triangle::new(
            [Vector3::new(0.1, 0.2, 0.3), Vector3::new(-1.0, 2.0, 5.5), Vector3::new(1e-7, -0.0, 3.0)],
            0.7,
            -1.25,
            Vector3::new(0.3, -0.2, 0.1),
            0,
        );
        let scene = Scene::Triangles(TriangleSoup::from_triangles(0, &[t]));
        let bytes = encode(&scene);
        assert!(header_text(&bytes).contains("element triangle 1\n"));
        let back = read_scene(&mut Cursor::new(bytes)).unwrap();
        match (&scene, &back) {
            (Scene::Triangles(a), Scene::Triangles(b)) => {
                let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
                assert_eq!(bits(&a.vertices), bits(&b.vertices));
                assert_eq!(bits(&a.log_smoothness), bits(&b.log_smoothness));
                assert_eq!(b.sh_rest_len(), 0);
            }
            _ => panic!("variant changed"),
        }
    }

    #[test]
    fn test_length_mismatch_on_write() {
        let g = Gaussian::isotropic(Vector3::zeros(), 0.0, 0.0, Vector3::zeros(), 0);
        let mut cloud = GaussianCloud::from_gaussians(0, &[g]);
        cloud.rotations.pop();
        let err = write_scene(&mut Vec::new(), &Scene::Gaussians(cloud)).unwrap_err();
        assert!(matches!(err, SnapshotError::LengthMismatch { group: "rotations", expected: 4, found: 3 }));
    }

    #[test]
    fn test_malformed_headers() {
        let cases: [&[u8]; 4] = [
            b"plx\n",
            b"ply\nformat ascii 1.0\nelement vertex 0\nend_header\n",
            b"ply\nformat binary_little_endian 1.0\nelement vertex 0\nproperty uchar red\nend_header\n",
            b"ply\nformat binary_little_endian 1.0\nelement vertex 0\n",
        ];
        for bytes in cases {
            let err = read_scene(&mut Cursor::new(bytes)).unwrap_err();
            assert!(matches!(err, SnapshotError::MalformedHeader(_)), "{err}");
        }
    }

    #[test]
    fn test_wrong_property_order() {
        let bytes = b"ply\nformat binary_little_endian 1.0\ncomment features_rest_shape 0 3\nelement vertex 0\nproperty float y\nend_header\n";
        let err = read_scene(&mut Cursor::new(&bytes[..])).unwrap_err();
        match err {
            SnapshotError::UnexpectedProperty { expected, found } => {
                assert_eq!(expected, "x");
                assert_eq!(found, "y");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_unsupported_rest_shape() {
        let bytes = b"ply\nformat binary_little_endian 1.0\ncomment features_rest_shape 5 3\nelement vertex 0\nend_header\n";
        let err = read_scene(&mut Cursor::new(&bytes[..])).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedShRest(5)));
    }

    #[test]
    fn test_truncated_body_is_io_error() {
        let g = Gaussian::isotropic(Vector3::zeros(), 0.0, 0.0, Vector3::zeros(), 0);
        let mut bytes = encode(&Scene::Gaussians(GaussianCloud::from_gaussians(0, &[g])));
        bytes.truncate(bytes.len() - 2);
        let err = read_scene(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, SnapshotError::Io(_)));
    }

    fn header_only(count: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_header(&mut bytes, GAUSSIAN_ELEMENT, count, 0, &gaussian_properties(0)).unwrap();
        bytes
    }

    #[test]
    fn test_overflowing_element_count_is_malformed() {
        let err = read_scene(&mut Cursor::new(header_only(999_999_999_999_999_999))).unwrap_err();
        assert!(matches!(err, SnapshotError::MalformedHeader(_)), "{err}");
    }

    #[test]
    fn test_huge_element_count_with_empty_body_is_io_error() {
        let err = read_scene(&mut Cursor::new(header_only(1_000_000_000_000))).unwrap_err();
        assert!(matches!(err, SnapshotError::Io(_)), "{err}");
    }
}
