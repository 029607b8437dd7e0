//! 多边形归属测试 (GeometryIndex)
//! Point-in-polygon membership for zone monitoring
//!
//! 纯函数几何运算: 射线法 + 边界点按"在内"处理,
//! 与区域监控的归属策略保持一致。

use super::types::Point;
use serde::Serialize;
use thiserror::Error;

/// 非法多边形定义
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolygonError {
    #[error("至少需要3个不同顶点, 实际 {0} 个")]
    TooFewVertices(usize),
    #[error("顶点坐标非有限值")]
    NonFiniteCoordinate,
    #[error("多边形边界自相交")]
    SelfIntersecting,
}

/// 已校验的闭合多边形环
///
/// 顶点按输入顺序存储, 首尾隐式闭合。构造即校验,
/// 非法定义不会产生实例。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Polygon {
    vertices: Vec<Point>,
}

/// 边界点判定容差 (像素)
const EDGE_EPSILON: f32 = 1e-4;

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Result<Self, PolygonError> {
        if vertices.iter().any(|v| !v.is_finite()) {
            return Err(PolygonError::NonFiniteCoordinate);
        }

        let distinct = count_distinct(&vertices);
        if distinct < 3 {
            return Err(PolygonError::TooFewVertices(distinct));
        }

        let polygon = Self { vertices };
        if polygon.is_self_intersecting() {
            return Err(PolygonError::SelfIntersecting);
        }
        Ok(polygon)
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    /// 点归属测试, 边界点视为在内
    pub fn contains(&self, p: Point) -> bool {
        if self.on_boundary(p) {
            return true;
        }

        // 射线法 (向+x方向发射)
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let vi = self.vertices[i];
            let vj = self.vertices[j];
            if (vi.y > p.y) != (vj.y > p.y) {
                let x_cross = vi.x + (p.y - vi.y) * (vj.x - vi.x) / (vj.y - vi.y);
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    fn on_boundary(&self, p: Point) -> bool {
        let n = self.vertices.len();
        (0..n).any(|i| {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            distance_to_segment(p, a, b) <= EDGE_EPSILON
        })
    }

    fn is_self_intersecting(&self) -> bool {
        let n = self.vertices.len();
        for i in 0..n {
            for j in (i + 1)..n {
                // 跳过相邻边 (共享端点不算自相交)
                if j == i + 1 || (i == 0 && j == n - 1) {
                    continue;
                }
                let (a, b) = (self.vertices[i], self.vertices[(i + 1) % n]);
                let (c, d) = (self.vertices[j], self.vertices[(j + 1) % n]);
                if segments_intersect(a, b, c, d) {
                    return true;
                }
            }
        }
        false
    }
}

fn count_distinct(vertices: &[Point]) -> usize {
    let mut distinct: Vec<Point> = Vec::with_capacity(vertices.len());
    for &v in vertices {
        if !distinct.iter().any(|&d| d == v) {
            distinct.push(v);
        }
    }
    distinct.len()
}

/// 叉积符号: >0 左转, <0 右转, =0 共线
fn orientation(a: Point, b: Point, c: Point) -> f32 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// 两线段是否相交, 含共线重叠与端点落在对方线段上的退化情形
fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    let d1 = orientation(a, b, c);
    let d2 = orientation(a, b, d);
    let d3 = orientation(c, d, a);
    let d4 = orientation(c, d, b);
    if d1 * d2 < 0.0 && d3 * d4 < 0.0 {
        return true;
    }
    // 共线退化: 折返环的边会整体或部分重叠
    (d1 == 0.0 && on_segment(a, b, c))
        || (d2 == 0.0 && on_segment(a, b, d))
        || (d3 == 0.0 && on_segment(c, d, a))
        || (d4 == 0.0 && on_segment(c, d, b))
}

/// 已知p与线段ab共线时, p是否落在ab的包围盒内
fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let len_sq = abx * abx + aby * aby;
    if len_sq <= f32::EPSILON {
        return p.distance(a);
    }
    let t = ((p.x - a.x) * abx + (p.y - a.y) * aby) / len_sq;
    let t = t.clamp(0.0, 1.0);
    p.distance(Point::new(a.x + t * abx, a.y + t * aby))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ])
        .unwrap()
    }

    #[test]
    fn interior_and_exterior_points() {
        let poly = square();
        assert!(poly.contains(Point::new(50.0, 50.0)));
        assert!(poly.contains(Point::new(1.0, 99.0)));
        assert!(!poly.contains(Point::new(150.0, 50.0)));
        assert!(!poly.contains(Point::new(-1.0, 50.0)));
        assert!(!poly.contains(Point::new(50.0, 100.5)));
    }

    #[test]
    fn boundary_points_are_inside() {
        let poly = square();
        // 边上
        assert!(poly.contains(Point::new(50.0, 0.0)));
        assert!(poly.contains(Point::new(100.0, 50.0)));
        // 顶点上
        assert!(poly.contains(Point::new(0.0, 0.0)));
        assert!(poly.contains(Point::new(100.0, 100.0)));
    }

    #[test]
    fn concave_polygon_membership() {
        // L形
        let poly = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 40.0),
            Point::new(40.0, 40.0),
            Point::new(40.0, 100.0),
            Point::new(0.0, 100.0),
        ])
        .unwrap();
        assert!(poly.contains(Point::new(20.0, 80.0)));
        assert!(poly.contains(Point::new(80.0, 20.0)));
        assert!(!poly.contains(Point::new(80.0, 80.0)));
    }

    #[test]
    fn too_few_distinct_vertices_rejected() {
        let err = Polygon::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]).unwrap_err();
        assert_eq!(err, PolygonError::TooFewVertices(2));

        // 三个顶点但两个重合
        let err = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 0.0),
        ])
        .unwrap_err();
        assert_eq!(err, PolygonError::TooFewVertices(2));
    }

    #[test]
    fn self_intersecting_ring_rejected() {
        // 蝴蝶结
        let err = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(100.0, 0.0),
            Point::new(0.0, 100.0),
        ])
        .unwrap_err();
        assert_eq!(err, PolygonError::SelfIntersecting);
    }

    #[test]
    fn collinear_folded_ring_rejected() {
        // 折返: 顶点(20, 0)落在非相邻边(0,0)-(100,0)上
        let err = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(20.0, 50.0),
        ])
        .unwrap_err();
        assert_eq!(err, PolygonError::SelfIntersecting);

        // 共线的中间顶点本身不算自相交
        assert!(Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(50.0, 50.0),
        ])
        .is_ok());
    }

    #[test]
    fn non_finite_coordinates_rejected() {
        let err = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(f32::NAN, 1.0),
            Point::new(1.0, 0.0),
        ])
        .unwrap_err();
        assert_eq!(err, PolygonError::NonFiniteCoordinate);
    }
}
