use log::{debug, info, warn};

use crate::{
    datatypes::Vertex,
    element::ElementKind,
    error::{FaultlineError, Result},
    geometry::{cross, point_in_triangle, signed_area, GEOMETRY_EPSILON},
    mesh::Mesh,
};

/// Element family produced by [`rectangle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridElement {
    Triangle3,
    Triangle6,
    Quad4,
}

impl GridElement {
    pub fn parse(name: &str) -> Result<GridElement> {
        match name.trim().to_lowercase().as_str() {
            "tri3" | "triangle3" | "triangle" => Ok(GridElement::Triangle3),
            "tri6" | "triangle6" => Ok(GridElement::Triangle6),
            "quad4" | "quad" => Ok(GridElement::Quad4),
            other => Err(FaultlineError::Input(format!(
                "Unrecognized grid element type {other}"
            ))),
        }
    }
}

/// Meshes an axis-aligned rectangle with `nx` x `ny` cells
///
/// # Arguments
/// * `mesh` - The mesh to append to
/// * `origin` - Lower-left corner
/// * `width` - Extent along x
/// * `height` - Extent along y
/// * `nx` - Cells along x
/// * `ny` - Cells along y
/// * `element` - Quadrilateral cells, or cells split into two triangles
/// * `material_id` - Material assigned to every element
///
/// # Returns
/// The ids of the created elements
pub fn rectangle(
    mesh: &mut Mesh,
    origin: Vertex,
    width: f64,
    height: f64,
    nx: usize,
    ny: usize,
    element: GridElement,
    material_id: usize,
) -> Result<Vec<usize>> {
    if nx == 0 || ny == 0 {
        return Err(FaultlineError::Mesher(
            "Rectangle needs at least one cell in each direction".to_owned(),
        ));
    }
    if width <= 0.0 || height <= 0.0 {
        return Err(FaultlineError::Mesher(format!(
            "Rectangle has non-positive size {width} x {height}"
        )));
    }

    // quadratic triangles need a grid at half spacing
    let refine = if element == GridElement::Triangle6 { 2 } else { 1 };
    let cols = refine * nx + 1;
    let rows = refine * ny + 1;
    let dx = width / (refine * nx) as f64;
    let dy = height / (refine * ny) as f64;

    let base = mesh.node_count();
    for j in 0..rows {
        for i in 0..cols {
            mesh.add_node(origin.offset(i as f64 * dx, j as f64 * dy));
        }
    }
    let node = |i: usize, j: usize| base + j * cols + i;

    let mut created = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            match element {
                GridElement::Quad4 => {
                    created.push(mesh.add_element(
                        ElementKind::Quad4,
                        vec![node(i, j), node(i + 1, j), node(i + 1, j + 1), node(i, j + 1)],
                        material_id,
                    )?);
                }
                GridElement::Triangle3 => {
                    let (n00, n10, n11, n01) =
                        (node(i, j), node(i + 1, j), node(i + 1, j + 1), node(i, j + 1));
                    created.push(mesh.add_element(ElementKind::Triangle3, vec![n00, n10, n11], material_id)?);
                    created.push(mesh.add_element(ElementKind::Triangle3, vec![n00, n11, n01], material_id)?);
                }
                GridElement::Triangle6 => {
                    let (ci, cj) = (2 * i, 2 * j);
                    created.push(mesh.add_element(
                        ElementKind::Triangle6,
                        vec![
                            node(ci, cj),
                            node(ci + 2, cj),
                            node(ci + 2, cj + 2),
                            node(ci + 1, cj),
                            node(ci + 2, cj + 1),
                            node(ci + 1, cj + 1),
                        ],
                        material_id,
                    )?);
                    created.push(mesh.add_element(
                        ElementKind::Triangle6,
                        vec![
                            node(ci, cj),
                            node(ci + 2, cj + 2),
                            node(ci, cj + 2),
                            node(ci + 1, cj + 1),
                            node(ci + 1, cj + 2),
                            node(ci, cj + 1),
                        ],
                        material_id,
                    )?);
                }
            }
        }
    }

    info!(
        "meshed {width} x {height} rectangle into {} {:?} elements",
        created.len(),
        element
    );
    Ok(created)
}

/// Triangulates a simple polygon by ear clipping. Clockwise input is
/// reversed. Collinear vertices are dropped when no ear can be found; if the
/// clipper still stalls, the triangles produced so far are kept.
///
/// # Returns
/// The ids of the created elements
pub fn polygon(mesh: &mut Mesh, vertices: &[Vertex], material_id: usize) -> Result<Vec<usize>> {
    if vertices.len() < 3 {
        return Err(FaultlineError::Mesher(format!(
            "Polygon needs at least 3 vertices, got {}",
            vertices.len()
        )));
    }

    let mut outline: Vec<Vertex> = vertices.to_vec();
    if signed_area(&outline) < 0.0 {
        outline.reverse();
    }

    let node_ids: Vec<usize> = outline.iter().map(|v| mesh.add_node(*v)).collect();
    let mut remaining: Vec<usize> = (0..outline.len()).collect();
    let mut created = Vec::new();

    while remaining.len() > 3 {
        let m = remaining.len();
        let mut ear: Option<usize> = None;

        for k in 0..m {
            let prev = &outline[remaining[(k + m - 1) % m]];
            let cur = &outline[remaining[k]];
            let next = &outline[remaining[(k + 1) % m]];

            if cross(prev, cur, next) <= GEOMETRY_EPSILON {
                continue;
            }

            let blocked = remaining.iter().enumerate().any(|(idx, v)| {
                if idx == k || idx == (k + m - 1) % m || idx == (k + 1) % m {
                    return false;
                }
                point_in_triangle(&outline[*v], prev, cur, next)
            });
            if !blocked {
                ear = Some(k);
                break;
            }
        }

        match ear {
            Some(k) => {
                let tri = vec![
                    node_ids[remaining[(k + m - 1) % m]],
                    node_ids[remaining[k]],
                    node_ids[remaining[(k + 1) % m]],
                ];
                created.push(mesh.add_element(ElementKind::Triangle3, tri, material_id)?);
                remaining.remove(k);
            }
            None => {
                let collinear = (0..m).find(|k| {
                    let prev = &outline[remaining[(k + m - 1) % m]];
                    let next = &outline[remaining[(k + 1) % m]];
                    cross(prev, &outline[remaining[*k]], next).abs() <= GEOMETRY_EPSILON
                });
                match collinear {
                    Some(k) => {
                        debug!("dropping collinear polygon vertex {}", remaining[k]);
                        remaining.remove(k);
                    }
                    None => {
                        warn!(
                            "ear clipping stalled with {} vertices left; polygon may self-intersect",
                            m
                        );
                        return Ok(created);
                    }
                }
            }
        }
    }

    if remaining.len() == 3 {
        let (a, b, c) = (
            &outline[remaining[0]],
            &outline[remaining[1]],
            &outline[remaining[2]],
        );
        if cross(a, b, c) > GEOMETRY_EPSILON {
            let tri = remaining.iter().map(|v| node_ids[*v]).collect();
            created.push(mesh.add_element(ElementKind::Triangle3, tri, material_id)?);
        } else {
            warn!("skipping degenerate final ear");
        }
    }

    info!(
        "triangulated {}-vertex polygon into {} elements",
        vertices.len(),
        created.len()
    );
    Ok(created)
}

/// Radial mesh of a disk: a fan of triangles around the centre and
/// quadrilateral rings outside it
///
/// # Arguments
/// * `center` - Disk centre
/// * `radius` - Outer radius
/// * `rings` - Number of radial divisions
/// * `segments` - Number of circumferential divisions
///
/// # Returns
/// The ids of the created elements
pub fn circle(
    mesh: &mut Mesh,
    center: Vertex,
    radius: f64,
    rings: usize,
    segments: usize,
    material_id: usize,
) -> Result<Vec<usize>> {
    if rings == 0 || segments < 3 {
        return Err(FaultlineError::Mesher(format!(
            "Circle needs at least 1 ring and 3 segments, got {rings} and {segments}"
        )));
    }
    if radius <= 0.0 {
        return Err(FaultlineError::Mesher(format!(
            "Circle has non-positive radius {radius}"
        )));
    }

    let center_id = mesh.add_node(center);
    let mut ring_ids: Vec<Vec<usize>> = Vec::with_capacity(rings);
    for r in 1..=rings {
        let ring_radius = radius * r as f64 / rings as f64;
        let ids = (0..segments)
            .map(|k| {
                let theta = 2.0 * std::f64::consts::PI * k as f64 / segments as f64;
                mesh.add_node(center.offset(ring_radius * theta.cos(), ring_radius * theta.sin()))
            })
            .collect();
        ring_ids.push(ids);
    }

    let mut created = Vec::new();
    for k in 0..segments {
        let next = (k + 1) % segments;
        created.push(mesh.add_element(
            ElementKind::Triangle3,
            vec![center_id, ring_ids[0][k], ring_ids[0][next]],
            material_id,
        )?);
    }
    for r in 1..rings {
        let inner = &ring_ids[r - 1];
        let outer = &ring_ids[r];
        for k in 0..segments {
            let next = (k + 1) % segments;
            created.push(mesh.add_element(
                ElementKind::Quad4,
                vec![inner[k], outer[k], outer[next], inner[next]],
                material_id,
            )?);
        }
    }

    info!(
        "meshed circle of radius {radius} into {} elements",
        created.len()
    );
    Ok(created)
}

/// Parses the numbers of an SVG `points` attribute into vertices
fn parse_svg_points(points_raw: &str, id: &str) -> Result<Vec<Vertex>> {
    let values: Vec<f64> = points_raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| {
                FaultlineError::Input(format!("Non-float value {s} in svg points of {id}"))
            })
        })
        .collect::<Result<_>>()?;

    if values.len() % 2 != 0 {
        return Err(FaultlineError::Input(format!(
            "Odd number of coordinates in svg points of {id}"
        )));
    }

    // svg y grows downward
    Ok(values
        .chunks(2)
        .map(|pair| Vertex::new(pair[0], -pair[1]))
        .collect())
}

fn parse_svg_attribute(node: &roxmltree::Node, name: &str, default: Option<f64>) -> Result<f64> {
    match node.attribute(name) {
        Some(value) => value.trim().parse().map_err(|_| {
            FaultlineError::Input(format!("Non-float {name} value {value} in svg rectangle"))
        }),
        None => default.ok_or_else(|| {
            FaultlineError::Input(format!("Missing {name} definition in svg rectangle"))
        }),
    }
}

/// Resolves the id of an svg element, falling back to its parent's id
fn svg_item_id<'a, 'input>(node: &roxmltree::Node<'a, 'input>) -> Option<&'a str> {
    node.attribute("id")
        .or_else(|| node.parent().and_then(|p| p.attribute("id")))
}

/// Parses the `OUTER` polygon, polyline or rect of an svg document. `INNER`
/// geometry is reported and ignored; the ear clipper meshes simple polygons
/// only.
fn parse_svg(contents: &str, min_spacing: f64) -> Result<Vec<Vertex>> {
    let doc = roxmltree::Document::parse(contents)
        .map_err(|err| FaultlineError::Input(format!("Error in svg file: {err}")))?;

    let mut outer: Option<Vec<Vertex>> = None;
    let mut skipped_vertices: usize = 0;

    for node in doc.descendants() {
        let tag = node.tag_name().name();
        let vertices = match tag {
            "polyline" | "polygon" => {
                let id = svg_item_id(&node).unwrap_or("<anonymous>");
                let points = node.attribute("points").ok_or_else(|| {
                    FaultlineError::Input(format!("No points in svg {tag} {id}"))
                })?;
                parse_svg_points(points, id)?
            }
            "rect" => {
                let x = parse_svg_attribute(&node, "x", Some(0.0))?;
                let y = parse_svg_attribute(&node, "y", Some(0.0))?;
                let width = parse_svg_attribute(&node, "width", None)?;
                let height = parse_svg_attribute(&node, "height", None)?;
                vec![
                    Vertex::new(x, -y),
                    Vertex::new(x + width, -y),
                    Vertex::new(x + width, -y - height),
                    Vertex::new(x, -y - height),
                ]
            }
            _ => continue,
        };

        let id = match svg_item_id(&node) {
            Some(id) => id.trim(),
            None => {
                return Err(FaultlineError::Input(
                    "Error in svg file. Missing id field on geometry".to_owned(),
                ))
            }
        };

        if id.starts_with("OUTER") {
            if outer.is_some() {
                return Err(FaultlineError::Input(
                    "Multiple OUTER geometries in SVG".to_owned(),
                ));
            }
            let mut points: Vec<Vertex> = Vec::with_capacity(vertices.len());
            for vertex in vertices {
                if points.contains(&vertex) {
                    warn!("duplicate point at {:?} in {id}", vertex);
                    continue;
                }
                if let Some(last) = points.last() {
                    if last.distance(&vertex) < min_spacing {
                        skipped_vertices += 1;
                        continue;
                    }
                }
                points.push(vertex);
            }
            outer = Some(points);
        } else if id.starts_with("INNER") {
            warn!("ignoring INNER geometry {id}; holes are not meshed");
        } else {
            warn!("skipping svg geometry with id {id}. Only supports OUTER");
        }
    }

    if skipped_vertices > 0 {
        warn!("skipped {} vertices closer than {}", skipped_vertices, min_spacing);
    }

    outer.ok_or_else(|| FaultlineError::Input("No OUTER geometry".to_owned()))
}

/// Parses csv text with `x` and `y` columns into vertices
fn parse_csv(contents: &str) -> Result<Vec<Vertex>> {
    let mut x_index: Option<usize> = None;
    let mut y_index: Option<usize> = None;
    let mut vertices: Vec<Vertex> = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let (xi, yi) = match (x_index, y_index) {
            (Some(xi), Some(yi)) => (xi, yi),
            _ => {
                let headers: Vec<&str> = line.split(',').map(|h| h.trim()).collect();
                x_index = headers.iter().position(|h| *h == "x");
                y_index = headers.iter().position(|h| *h == "y");
                if x_index.is_none() || y_index.is_none() {
                    return Err(FaultlineError::Input(
                        "Error in csv file: Missing x and/or y field".to_owned(),
                    ));
                }
                continue;
            }
        };

        let line_contents: Vec<f64> = line
            .split(',')
            .map(|v| {
                v.trim().parse().map_err(|_| {
                    FaultlineError::Input(format!("Non-float value {v} in csv points"))
                })
            })
            .collect::<Result<_>>()?;

        match (line_contents.get(xi), line_contents.get(yi)) {
            (Some(x), Some(y)) => vertices.push(Vertex::new(*x, *y)),
            _ => {
                return Err(FaultlineError::Input(format!(
                    "Short row in csv points: {line}"
                )))
            }
        }
    }

    Ok(vertices)
}

/// Loads a polygon outline from a `.csv` or `.svg` file
///
/// # Arguments
/// * `path` - The geometry file
/// * `min_spacing` - Consecutive svg vertices closer than this are skipped
pub fn load_outline(path: &str, min_spacing: f64) -> Result<Vec<Vertex>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| FaultlineError::Input(format!("Unable to open geometry file {path}: {err}")))?;

    if path.ends_with(".svg") {
        parse_svg(&contents, min_spacing)
    } else if path.ends_with(".csv") {
        parse_csv(&contents)
    } else {
        Err(FaultlineError::Input(format!(
            "Unrecognized geometry filetype {path}"
        )))
    }
}
