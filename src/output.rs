// Copyright (c) 2026 Kliment Olechnovic and Mikael Lund
// Part of the apollota project, licensed under the MIT License.
// SPDX-License-Identifier: MIT

//! Vertex output, the vertex adjacency graph, and reading vertex files back.
//!
//! Text lines are `q0 q1 q2 q3 x y z r`, optionally followed by four
//! neighbour columns where `-1` marks a missing neighbour.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead, Write};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::geometry::distance;
use crate::triangulation::QuadruplesMap;
use crate::tuple::{Quadruple, Triple};
use crate::types::{Ball, Sphere};

/// Vertex of the additively weighted Voronoi diagram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub quadruple: Quadruple,
    pub tangent_sphere: Sphere,
}

/// Neighbour slot `k` links to the vertex across the facet without generator `k`.
pub type VertexLinks = [Option<usize>; 4];

#[derive(Serialize)]
struct JsonVertex {
    quadruple: [usize; 4],
    tangent_sphere: Ball,
    #[serde(skip_serializing_if = "Option::is_none")]
    neighbors: Option<VertexLinks>,
}

/// Flatten a quadruples map into vertices, one per tangent sphere.
#[must_use]
pub fn collect_vertices_vector(map: &QuadruplesMap) -> Vec<Vertex> {
    map.iter()
        .flat_map(|(quadruple, tangent_spheres)| {
            tangent_spheres.iter().map(|tangent_sphere| Vertex {
                quadruple: *quadruple,
                tangent_sphere: *tangent_sphere,
            })
        })
        .collect()
}

/// Link vertices that share a facet.
///
/// A facet shared by exactly two vertices links them. When more vertices share
/// it, each pair is linked only if they are mutually nearest by tangent sphere
/// centre.
#[must_use]
pub fn construct_vertices_graph(vertices: &[Vertex]) -> Vec<VertexLinks> {
    let mut facets: BTreeMap<Triple, Vec<(usize, usize)>> = BTreeMap::new();
    for (id, vertex) in vertices.iter().enumerate() {
        for k in 0..4 {
            facets
                .entry(vertex.quadruple.exclude(k))
                .or_default()
                .push((id, k));
        }
    }

    let mut graph = vec![[None; 4]; vertices.len()];
    for sharing in facets.values() {
        match sharing.as_slice() {
            [] | [_] => {}
            [(a, ka), (b, kb)] => {
                graph[*a][*ka] = Some(*b);
                graph[*b][*kb] = Some(*a);
            }
            _ => {
                let nearest: Vec<usize> = (0..sharing.len())
                    .map(|i| nearest_in_group(vertices, sharing, i))
                    .collect();
                for (i, &j) in nearest.iter().enumerate() {
                    if nearest[j] == i {
                        let (a, ka) = sharing[i];
                        graph[a][ka] = Some(sharing[j].0);
                    }
                }
            }
        }
    }
    graph
}

fn nearest_in_group(vertices: &[Vertex], sharing: &[(usize, usize)], i: usize) -> usize {
    let center = &vertices[sharing[i].0].tangent_sphere.center;
    (0..sharing.len())
        .filter(|&j| j != i)
        .map(|j| (distance(center, &vertices[sharing[j].0].tangent_sphere.center), j))
        .min_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)))
        .map_or(i, |(_, j)| j)
}

fn write_vertex_fields<W: Write>(output: &mut W, vertex: &Vertex) -> io::Result<()> {
    let [a, b, c, d] = *vertex.quadruple.as_array();
    let t = &vertex.tangent_sphere;
    write!(
        output,
        "{a} {b} {c} {d} {:.15} {:.15} {:.15} {:.15}",
        t.center.x, t.center.y, t.center.z, t.r
    )
}

/// Write one `q0 q1 q2 q3 x y z r` line per vertex.
///
/// # Errors
/// Propagates write failures.
pub fn write_vertices<W: Write>(output: &mut W, vertices: &[Vertex]) -> io::Result<()> {
    for vertex in vertices {
        write_vertex_fields(output, vertex)?;
        writeln!(output)?;
    }
    Ok(())
}

/// Write vertices followed by their four neighbour columns.
///
/// # Errors
/// Propagates write failures.
pub fn write_vertices_with_graph<W: Write>(
    output: &mut W,
    vertices: &[Vertex],
    graph: &[VertexLinks],
) -> io::Result<()> {
    for (vertex, links) in vertices.iter().zip(graph) {
        write_vertex_fields(output, vertex)?;
        for link in links {
            match link {
                Some(id) => write!(output, " {id}")?,
                None => write!(output, " -1")?,
            }
        }
        writeln!(output)?;
    }
    Ok(())
}

/// Write vertices as a pretty-printed JSON array.
///
/// # Errors
/// Propagates write and serialization failures.
pub fn write_vertices_json<W: Write>(
    output: &mut W,
    vertices: &[Vertex],
    graph: Option<&[VertexLinks]>,
) -> io::Result<()> {
    let records: Vec<JsonVertex> = vertices
        .iter()
        .enumerate()
        .map(|(id, vertex)| JsonVertex {
            quadruple: *vertex.quadruple.as_array(),
            tangent_sphere: vertex.tangent_sphere.to_ball(),
            neighbors: graph.and_then(|g| g.get(id).copied()),
        })
        .collect();
    serde_json::to_writer_pretty(&mut *output, &records)?;
    writeln!(output)
}

fn meaningful_lines<R: BufRead>(reader: R) -> impl Iterator<Item = Result<(usize, String)>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(number, line)| match line {
            Err(e) => Some(Err(Error::from(e))),
            Ok(line) => {
                let content = line.split('#').next().unwrap_or_default();
                (!content.trim().is_empty()).then(|| Ok((number + 1, line)))
            }
        })
}

fn parse_quadruple<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Option<Quadruple> {
    let mut ids = [0usize; 4];
    for id in &mut ids {
        *id = fields.next()?.parse().ok()?;
    }
    Some(Quadruple::from_array(ids))
}

/// Read the quadruples of a vertex file, taking the first four integers of each line.
///
/// # Errors
/// Returns [`Error::MalformedLine`] for a line without four leading indices.
pub fn read_quadruples<R: BufRead>(reader: R) -> Result<BTreeSet<Quadruple>> {
    let mut quadruples = BTreeSet::new();
    for entry in meaningful_lines(reader) {
        let (line, content) = entry?;
        let data = content.split('#').next().unwrap_or_default();
        let quadruple = parse_quadruple(&mut data.split_whitespace())
            .ok_or(Error::MalformedLine { line, content })?;
        quadruples.insert(quadruple);
    }
    Ok(quadruples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn vertex(ids: [usize; 4], x: f64) -> Vertex {
        Vertex {
            quadruple: Quadruple::from_array(ids),
            tangent_sphere: Sphere::from_coords(x, 0.0, 0.0, 1.0),
        }
    }

    #[test]
    fn vertices_follow_map_order() {
        let mut map = QuadruplesMap::new();
        map.insert(
            Quadruple::new(4, 5, 6, 7),
            vec![Sphere::from_coords(1.0, 1.0, 1.0, 1.0)],
        );
        map.insert(
            Quadruple::new(0, 1, 2, 3),
            vec![
                Sphere::from_coords(0.0, 0.0, 0.0, 1.0),
                Sphere::from_coords(2.0, 0.0, 0.0, 1.0),
            ],
        );
        let vertices = collect_vertices_vector(&map);
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[0].quadruple, Quadruple::new(0, 1, 2, 3));
        assert_eq!(vertices[2].quadruple, Quadruple::new(4, 5, 6, 7));
    }

    #[test]
    fn two_vertices_sharing_a_facet_are_linked() {
        let vertices = vec![vertex([0, 1, 2, 3], 0.0), vertex([0, 1, 2, 4], 1.0)];
        let graph = construct_vertices_graph(&vertices);
        // facet (0,1,2) excludes generator 3 in both quadruples
        assert_eq!(graph[0], [None, None, None, Some(1)]);
        assert_eq!(graph[1], [None, None, None, Some(0)]);
    }

    #[test]
    fn crowded_facet_links_mutual_nearest_only() {
        let vertices = vec![
            vertex([0, 1, 2, 3], 0.0),
            vertex([0, 1, 2, 4], 1.0),
            vertex([0, 1, 2, 5], 10.0),
        ];
        let graph = construct_vertices_graph(&vertices);
        assert_eq!(graph[0][3], Some(1));
        assert_eq!(graph[1][3], Some(0));
        assert_eq!(graph[2][3], None);
    }

    #[test]
    fn text_output_and_reading_back() {
        let vertices = vec![vertex([0, 1, 2, 3], 0.5), vertex([0, 1, 2, 4], 1.25)];
        let graph = construct_vertices_graph(&vertices);

        let mut buffer = Vec::new();
        write_vertices_with_graph(&mut buffer, &vertices, &graph).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let first = text.lines().next().unwrap();
        assert_eq!(
            first,
            "0 1 2 3 0.500000000000000 0.000000000000000 0.000000000000000 1.000000000000000 -1 -1 -1 1"
        );

        let quadruples = read_quadruples(text.as_bytes()).unwrap();
        assert_eq!(
            quadruples,
            BTreeSet::from([Quadruple::new(0, 1, 2, 3), Quadruple::new(0, 1, 2, 4)])
        );
    }

    #[test]
    fn reading_skips_comments_and_reports_bad_lines() {
        let text = "# vertices\n3 2 1 0\n\n0 1 2\n";
        match read_quadruples(text.as_bytes()) {
            Err(Error::MalformedLine { line, .. }) => assert_eq!(line, 4),
            other => panic!("unexpected result: {other:?}"),
        }
        let quadruples = read_quadruples("# vertices\n3 2 1 0 # unsorted\n".as_bytes()).unwrap();
        assert_eq!(quadruples, BTreeSet::from([Quadruple::new(0, 1, 2, 3)]));
    }

    #[test]
    fn json_output_includes_neighbors_when_linked() {
        let vertices = vec![vertex([0, 1, 2, 3], 0.0), vertex([0, 1, 2, 4], 1.0)];
        let graph = construct_vertices_graph(&vertices);

        let mut plain = Vec::new();
        write_vertices_json(&mut plain, &vertices, None).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&plain).unwrap();
        assert_eq!(value[0]["quadruple"], serde_json::json!([0, 1, 2, 3]));
        assert!(value[0].get("neighbors").is_none());

        let mut linked = Vec::new();
        write_vertices_json(&mut linked, &vertices, Some(&graph)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&linked).unwrap();
        assert_eq!(value[1]["neighbors"], serde_json::json!([null, null, null, 0]));
        assert_relative_eq!(value[1]["tangent_sphere"]["x"].as_f64().unwrap(), 1.0);
    }
}
