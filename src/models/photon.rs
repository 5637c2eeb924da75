use rand::Rng;
use rand_distr::StandardNormal;

use crate::models::common::Point2D;

/// 媒質中の光速（mm/ns）: c / n, n = 1.333
pub const PHOTON_VELOCITY: f64 = 299.79 / 1.333;

/// チェレンコフ光子
///
/// 放射時刻・放射位置・進行方向に加え、生成時に一度だけ引いた2つの乱数
/// （一様乱数と標準正規乱数）を持ちます。検出判定と時間分解能の揺らぎは
/// 常にこの乱数を使うため、異なる検出器構成を全く同じ光子列で比較できます。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Photon {
    /// 放射時刻（ns）
    pub t: f64,
    pub x: f64,
    pub y: f64,
    /// 進行方向（rad）
    pub angle: f64,
    /// 変換判定用の一様乱数 [0, 1)
    pub uniform: f64,
    /// 時間揺らぎ用の標準正規乱数
    pub normal: f64,
}

impl Photon {
    /// 乱数を引いて光子を作成
    pub fn new<R: Rng + ?Sized>(t: f64, x: f64, y: f64, angle: f64, rng: &mut R) -> Self {
        let uniform = rng.gen_range(0.0..1.0);
        let normal = rng.sample(StandardNormal);
        Self::with_draws(t, x, y, angle, uniform, normal)
    }

    /// 乱数を指定して光子を作成
    pub fn with_draws(t: f64, x: f64, y: f64, angle: f64, uniform: f64, normal: f64) -> Self {
        Self { t, x, y, angle, uniform, normal }
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }
}
