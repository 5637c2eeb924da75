use std::ops::{Add, Sub, Mul};
use thiserror::Error;

/// 2次元位置を表す構造体
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    pub x: f64, // mm
    pub y: f64, // mm
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 2点間の距離を計算
    pub fn distance(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// 指定角度方向の単位ベクトル
    pub fn unit(angle: f64) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    /// 内積
    pub fn dot(&self, other: &Point2D) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// 2次元外積（z成分）
    pub fn cross(&self, other: &Point2D) -> f64 {
        self.x * other.y - self.y * other.x
    }
}

impl Add for Point2D {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Point2D {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f64> for Point2D {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar)
    }
}

/// 2次元の姿勢 [x, y, θ]
///
/// デバイスの中心位置と、その面（線）が水平軸となす角度を表します。
/// 座標系（フレーム）の表現としても使用します。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub x: f64,     // mm
    pub y: f64,     // mm
    pub angle: f64, // rad
}

impl Orientation {
    pub fn new(x: f64, y: f64, angle: f64) -> Self {
        Self { x, y, angle }
    }

    /// 恒等フレーム [0, 0, 0]
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// 面に沿った単位ベクトル
    pub fn direction(&self) -> Point2D {
        Point2D::unit(self.angle)
    }

    /// 逆変換フレーム
    ///
    /// `global_orientation(global_orientation(l, f), f.inverse()) == l` を満たします。
    pub fn inverse(&self) -> Self {
        let (sin_t, cos_t) = self.angle.sin_cos();
        Self::new(
            -(self.x * cos_t + self.y * sin_t),
            self.x * sin_t - self.y * cos_t,
            -self.angle,
        )
    }
}

/// 幾何計算のエラー
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeometryError {
    /// 2直線が平行で交点が存在しない
    #[error("交点なし: 光子の進行方向と面が平行です")]
    Parallel,
    /// 交点が光線の後方にある
    #[error("交点なし: 面が光子の進行方向の後方にあります")]
    Behind,
}

/// 平行判定に使う外積の閾値
pub const PARALLEL_TOLERANCE: f64 = 1e-12;

/// ローカル座標系の姿勢をグローバル座標系へ変換
///
/// ローカルの (x, y) をフレームの θ だけ回転してフレームの (x, y) だけ平行移動し、
/// 角度はフレームの角度を加算します。
pub fn global_orientation(local: Orientation, frame: Orientation) -> Orientation {
    let (sin_t, cos_t) = frame.angle.sin_cos();
    Orientation::new(
        frame.x + local.x * cos_t - local.y * sin_t,
        frame.y + local.x * sin_t + local.y * cos_t,
        frame.angle + local.angle,
    )
}

/// 光線の始点からデバイス面を含む無限直線までの符号付き距離
///
/// 正なら面は進行方向の前方、負なら後方にあります。
///
/// # 引数
///
/// * `origin` - 光線の始点
/// * `angle` - 光線の方向角（rad）
/// * `device` - デバイス面の姿勢（中心と面の角度）
///
/// # 戻り値
///
/// 光線に沿った距離（mm）。2直線が平行な場合は `GeometryError::Parallel`
pub fn ray_distance(origin: Point2D, angle: f64, device: Orientation) -> Result<f64, GeometryError> {
    let d_ray = Point2D::unit(angle);
    let d_dev = device.direction();
    let denom = d_ray.cross(&d_dev);
    if denom.abs() < PARALLEL_TOLERANCE {
        return Err(GeometryError::Parallel);
    }
    Ok((device.position() - origin).cross(&d_dev) / denom)
}

/// 光線（点 + 方向角）とデバイス面を含む無限直線の交点を計算
///
/// 交点は光線の前後どちらにあってもかまいません。
///
/// # 引数
///
/// * `origin` - 光線上の点
/// * `angle` - 光線の方向角（rad）
/// * `device` - デバイス面の姿勢（中心と面の角度）
///
/// # 戻り値
///
/// 交点。2直線が平行な場合は `GeometryError::Parallel`
pub fn intersect(origin: Point2D, angle: f64, device: Orientation) -> Result<Point2D, GeometryError> {
    let s = ray_distance(origin, angle, device)?;
    Ok(origin + Point2D::unit(angle) * s)
}

/// 光線が前方で到達するデバイス面上の点
///
/// 始点から進行方向に正の距離だけ進んだ交点のみを返します。
/// 面の上や後方にある場合は `GeometryError::Behind` です。
pub fn intersect_ahead(origin: Point2D, angle: f64, device: Orientation) -> Result<Point2D, GeometryError> {
    let s = ray_distance(origin, angle, device)?;
    if s <= 0.0 {
        return Err(GeometryError::Behind);
    }
    Ok(origin + Point2D::unit(angle) * s)
}

/// 数学ユーティリティ関数
pub mod math_utils {
    /// 面の法線に対する入射角の余弦
    ///
    /// 面の角度 `surface_angle` に沿った方向と光子の方向 `ray_angle` から
    /// |cos θ| = |sin(ray - surface)| を返します。
    pub fn incidence_cosine(ray_angle: f64, surface_angle: f64) -> f64 {
        (ray_angle - surface_angle).sin().abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256StarStar;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    #[test]
    fn test_identity_frame_is_identity_map() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(11);
        for _ in 0..20 {
            let local = Orientation::new(
                rng.gen_range(-1000.0..1000.0),
                rng.gen_range(-1000.0..1000.0),
                rng.gen_range(-PI..PI),
            );
            let g = global_orientation(local, Orientation::identity());
            assert_float_eq!(g.x, local.x, abs <= 1e-12);
            assert_float_eq!(g.y, local.y, abs <= 1e-12);
            assert_float_eq!(g.angle, local.angle, abs <= 1e-12);
        }
    }

    #[test]
    fn test_inverse_frame_recovers_local() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(12);
        for _ in 0..20 {
            let local = Orientation::new(
                rng.gen_range(-500.0..500.0),
                rng.gen_range(-500.0..500.0),
                rng.gen_range(-PI..PI),
            );
            let frame = Orientation::new(
                rng.gen_range(-3000.0..3000.0),
                rng.gen_range(-3000.0..3000.0),
                rng.gen_range(-PI..PI),
            );
            let back = global_orientation(global_orientation(local, frame), frame.inverse());
            assert_float_eq!(back.x, local.x, abs <= 1e-9);
            assert_float_eq!(back.y, local.y, abs <= 1e-9);
            assert_float_eq!(back.angle, local.angle, abs <= 1e-12);
        }
    }

    #[test]
    fn test_rotation_by_quarter_turn() {
        let g = global_orientation(Orientation::new(1.0, 0.0, 0.0), Orientation::new(10.0, 0.0, FRAC_PI_2));
        assert_float_eq!(g.x, 10.0, abs <= 1e-12);
        assert_float_eq!(g.y, 1.0, abs <= 1e-12);
        assert_float_eq!(g.angle, FRAC_PI_2, abs <= 1e-12);
    }

    #[test]
    fn test_photon_aimed_at_center_hits_center() {
        let sensor = Orientation::new(120.0, -35.0, FRAC_PI_2);
        let origin = Point2D::new(-400.0, 200.0);
        let aim = (sensor.y - origin.y).atan2(sensor.x - origin.x);
        let hit = intersect(origin, aim, sensor).unwrap();
        assert_float_eq!(hit.x, sensor.x, abs <= 1e-9);
        assert_float_eq!(hit.y, sensor.y, abs <= 1e-9);
    }

    #[test]
    fn test_parallel_photon_has_no_intersection() {
        let sensor = Orientation::new(0.0, 0.0, FRAC_PI_4);
        let result = intersect(Point2D::new(5.0, -3.0), FRAC_PI_4 + PI, sensor);
        assert_eq!(result, Err(GeometryError::Parallel));
    }

    #[test]
    fn test_vertical_surface_is_well_conditioned() {
        let module = Orientation::new(0.0, 1400.0, FRAC_PI_2);
        let hit = intersect(Point2D::new(-2000.0, 0.0), 0.6, module).unwrap();
        assert_float_eq!(hit.x, 0.0, abs <= 1e-9);
        assert_float_eq!(hit.y, 2000.0 * 0.6_f64.tan(), abs <= 1e-9);
    }

    #[test]
    fn test_surface_behind_photon_is_not_reached() {
        let module = Orientation::new(100.0, 0.0, FRAC_PI_2);
        assert!(ray_distance(Point2D::new(150.0, 0.0), 0.0, module).unwrap() < 0.0);
        assert_eq!(
            intersect_ahead(Point2D::new(150.0, 0.0), 0.0, module),
            Err(GeometryError::Behind)
        );
        // 面上の始点も前方の交点とはみなさない
        assert_eq!(
            intersect_ahead(Point2D::new(100.0, 3.0), 0.0, module),
            Err(GeometryError::Behind)
        );
        let hit = intersect_ahead(Point2D::new(150.0, 0.0), PI, module).unwrap();
        assert_float_eq!(hit.x, 100.0, abs <= 1e-9);
        // 向きを無視する交点計算では後方の交点も返る
        assert!(intersect(Point2D::new(150.0, 0.0), 0.0, module).is_ok());
    }
}
