//! # Asimov モジュール
//!
//! 任意の候補トラックパラメータに対して、各センサーの期待ヒット数と期待到達時刻を
//! 閉じた形で計算する決定論的な期待値エンジンです。光子輸送（[`crate::transport`]）と
//! 多光子極限で一致するように作られています。
//!
//! コーンの片側ごとに:
//!
//! 1. センサーの両端から、候補角度 ± チェレンコフ角の逆向きに仮想光子を飛ばし、
//!    トラック直線との交点をトラック方向に射影して [0, length] にクリップする
//! 2. 放射方向の前方にセンサー面がある部分だけを残し、その区間長を
//!    このセンサーに光を届ける経路長とする
//! 3. 期待数 = 経路長 × 密度 / 2 × 平均量子効率
//! 4. 期待時刻 = 両端の飛行時間の中点 + 経路の中点 / 速度 + t0 + 平均走行時間

use std::f64::consts::PI;

use tracing::trace;

use crate::models::{
    common::{intersect, math_utils, ray_distance, Orientation},
    detector::{Detector, DetectorLayout, SensorLayout},
    emitter::{Emitter, EmitterOptics, TrackParameters},
    event::Event,
    photon::PHOTON_VELOCITY,
    property::PropertyError,
    traits::ValueKind,
};

/// 1センサーの期待値
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorExpectation {
    /// 期待ヒット数
    pub n: f64,
    /// 期待到達時刻（ns）
    pub t: f64,
}

/// コーン片側についての計算結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeSide {
    /// クリップ後のトラック上の位置 [d0, d1]（mm）
    pub positions: [f64; 2],
    pub expectation: SensorExpectation,
}

impl ConeSide {
    pub fn path_length(&self) -> f64 {
        (self.positions[1] - self.positions[0]).abs()
    }
}

/// センサー端から仮想光子を逆向きに飛ばし、トラック上の放射位置を求める
///
/// 位置の区間は線形なので、区間の一部でセンサー面が放射方向の後方になる場合は
/// 面までの距離が 0 になる位置で区間を切り詰めます。
///
/// # 戻り値
///
/// [0, length] にクリップした2つの位置。仮想光子がトラックと平行な場合や、
/// 区間全体でセンサー面が後方にある場合は `None`
pub fn clipped_track_positions(
    track: &TrackParameters,
    sensor: &SensorLayout,
    emission_angle: f64,
) -> Option<[f64; 2]> {
    let line = Orientation::new(track.x, track.y, track.angle);
    let start = track.start();
    let direction = track.direction();
    let mut positions = [0.0; 2];
    for (slot, edge) in positions.iter_mut().zip(sensor.edges()) {
        let p = intersect(edge, emission_angle + PI, line).ok()?;
        let d = (p - start).dot(&direction);
        *slot = d.max(0.0).min(track.length);
    }

    let s0 = surface_distance(track, positions[0], emission_angle, &sensor.orientation)?;
    let s1 = surface_distance(track, positions[1], emission_angle, &sensor.orientation)?;
    match (s0 > 0.0, s1 > 0.0) {
        (true, true) => {}
        (false, false) => return None,
        (ahead_0, _) => {
            let crossing = positions[0] + (positions[1] - positions[0]) * s0 / (s0 - s1);
            if ahead_0 {
                positions[1] = crossing;
            } else {
                positions[0] = crossing;
            }
        }
    }
    Some(positions)
}

/// トラック上の位置 `d` から放射方向に測ったセンサー面までの符号付き距離
fn surface_distance(track: &TrackParameters, d: f64, emission_angle: f64, sensor: &Orientation) -> Option<f64> {
    let origin = track.start() + track.direction() * d;
    ray_distance(origin, emission_angle, *sensor).ok()
}

/// トラック上の位置 `d` から放射された光子がセンサー面に届くまでの飛行時間
fn flight_time(track: &TrackParameters, d: f64, emission_angle: f64, sensor: &Orientation) -> Option<f64> {
    let s = surface_distance(track, d, emission_angle, sensor)?;
    Some(s.max(0.0) / PHOTON_VELOCITY)
}

/// コーン片側（`side` = ±1）の期待値
pub fn expected_side(
    sensor: &SensorLayout,
    track: &TrackParameters,
    optics: &EmitterOptics,
    side: f64,
) -> Option<ConeSide> {
    let emission_angle = track.angle + side * optics.ch_angle;
    let positions = clipped_track_positions(track, sensor, emission_angle)?;
    let path_length = (positions[1] - positions[0]).abs();
    if path_length <= 0.0 {
        return None;
    }

    let response = &sensor.response;
    let cos_theta = math_utils::incidence_cosine(emission_angle, sensor.orientation.angle);
    let qe = response.qe * response.angular_factor(cos_theta) * response.mean_radial_factor();
    let n = path_length * optics.density / 2.0 * qe;

    let t_flight_0 = flight_time(track, positions[0], emission_angle, &sensor.orientation)?;
    let t_flight_1 = flight_time(track, positions[1], emission_angle, &sensor.orientation)?;
    let t = 0.5 * (t_flight_0 + t_flight_1)
        + 0.5 * (positions[0] + positions[1]) / optics.velocity
        + track.t0
        + response.mean_transit_delay();

    Some(ConeSide {
        positions,
        expectation: SensorExpectation { n, t },
    })
}

/// 1センサーの期待値（コーン両側の合計、時刻は期待数で重み付け）
pub fn expected_sensor(sensor: &SensorLayout, track: &TrackParameters, optics: &EmitterOptics) -> SensorExpectation {
    let mut n = 0.0;
    let mut weighted_t = 0.0;
    for side in [-1.0, 1.0] {
        if let Some(cone) = expected_side(sensor, track, optics, side) {
            n += cone.expectation.n;
            weighted_t += cone.expectation.n * cone.expectation.t;
        }
    }
    let t = if n > 0.0 { weighted_t / n } else { track.t0 };
    SensorExpectation { n, t }
}

/// 検出器全体の期待値
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub modules: Vec<Vec<SensorExpectation>>,
}

impl Expectation {
    pub fn get(&self, i_module: usize, i_sensor: usize) -> Option<&SensorExpectation> {
        self.modules.get(i_module).and_then(|m| m.get(i_sensor))
    }

    pub fn total(&self) -> f64 {
        self.modules.iter().flatten().map(|e| e.n).sum()
    }

    /// 集約形の Asimov イベント
    pub fn to_event(&self) -> Event {
        Event::from_aggregates(
            self.modules
                .iter()
                .map(|sensors| sensors.iter().map(|e| (e.n, e.n * e.t)).collect())
                .collect(),
        )
    }
}

/// 期待値エンジン
///
/// 検出器配置と放射パラメータを一度だけ解決し、候補トラックごとに期待値を計算します。
#[derive(Debug, Clone)]
pub struct ExpectationEngine {
    layout: DetectorLayout,
    optics: EmitterOptics,
}

impl ExpectationEngine {
    /// 検出器とエミッターの値（設計値または実現値）からエンジンを作成
    pub fn new(detector: &Detector, emitter: &Emitter, kind: ValueKind) -> Result<Self, PropertyError> {
        Ok(Self::from_layout(detector.layout(kind)?, emitter.optics(kind)?))
    }

    pub fn from_layout(layout: DetectorLayout, optics: EmitterOptics) -> Self {
        Self { layout, optics }
    }

    pub fn layout(&self) -> &DetectorLayout {
        &self.layout
    }

    pub fn optics(&self) -> &EmitterOptics {
        &self.optics
    }

    /// 候補トラックに対する全センサーの期待値
    pub fn evaluate(&self, track: &TrackParameters) -> Expectation {
        let modules: Vec<Vec<SensorExpectation>> = self
            .layout
            .modules
            .iter()
            .map(|module| {
                module
                    .sensors
                    .iter()
                    .map(|sensor| expected_sensor(sensor, track, &self.optics))
                    .collect()
            })
            .collect();
        let expectation = Expectation { modules };
        trace!(
            x = track.x,
            y = track.y,
            angle = track.angle,
            length = track.length,
            t0 = track.t0,
            n_expected = expectation.total(),
            "ASIMOV_EVALUATED"
        );
        expectation
    }

    /// 候補トラックの Asimov イベント
    pub fn asimov_event(&self, track: &TrackParameters) -> Event {
        self.evaluate(track).to_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sensor::SensorResponse;
    use float_eq::assert_float_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    fn sensor_at_origin() -> SensorLayout {
        SensorLayout {
            orientation: Orientation::new(0.0, 0.0, FRAC_PI_2),
            response: SensorResponse {
                width: 10.0,
                qe: 0.5,
                qe_angle_coeff: None,
                qe_radial_coeff: None,
                t_sig: 1.0,
                td: 1.0,
                td_radial_coeff: None,
                dark_noise_rate: 0.0,
            },
        }
    }

    /// x = -100, y = -50 から +x 方向のトラック（センサーの手前を通過する）
    fn track(length: f64) -> TrackParameters {
        TrackParameters {
            x: -100.0,
            y: -50.0,
            angle: 0.0,
            length,
            t0: 0.0,
        }
    }

    fn optics(ch_angle: f64) -> EmitterOptics {
        EmitterOptics {
            ch_angle,
            density: 0.1,
            velocity: 299.79,
        }
    }

    #[test]
    fn test_zero_cherenkov_angle_gives_no_path() {
        // 仮想光子がトラックと平行になり交点がない
        let sensor = sensor_at_origin();
        assert_eq!(clipped_track_positions(&track(200.0), &sensor, 0.0), None);
        let e = expected_sensor(&sensor, &track(200.0), &optics(0.0));
        assert_eq!(e.n, 0.0);
    }

    #[test]
    fn test_hand_computed_path_lengths() {
        let sensor = sensor_at_origin();
        // 45度: 端点 (0, -5) と (0, 5) からの仮想光子は y = -50 で x = -45, -55 に届く
        // → トラック始点からの距離 55 と 45
        let plus = expected_side(&sensor, &track(200.0), &optics(FRAC_PI_4), 1.0).unwrap();
        assert_float_eq!(plus.positions[0], 55.0, abs <= 1e-9);
        assert_float_eq!(plus.positions[1], 45.0, abs <= 1e-9);
        assert_float_eq!(plus.path_length(), 10.0, abs <= 1e-9);

        // 下向きのコーンは y = -50 から下へ進み、センサーには届かない
        assert!(expected_side(&sensor, &track(200.0), &optics(FRAC_PI_4), -1.0).is_none());

        // 長さ 50 では 55 が 50 にクリップされる: min(length, max(0, d))
        let clipped = expected_side(&sensor, &track(50.0), &optics(FRAC_PI_4), 1.0).unwrap();
        assert_float_eq!(clipped.positions[0], 50.0, abs <= 1e-9);
        assert_float_eq!(clipped.path_length(), 5.0, abs <= 1e-9);

        // 照らす区間に届く前にトラックが終わる場合は両端とも length に潰れる
        assert!(expected_side(&sensor, &track(40.0), &optics(FRAC_PI_4), 1.0).is_none());

        // n = 10 × 0.1 / 2 × 0.5（片側のみ）
        let total = expected_sensor(&sensor, &track(200.0), &optics(FRAC_PI_4));
        assert_float_eq!(total.n, 0.25, abs <= 1e-9);
    }

    #[test]
    fn test_track_through_sensor_lights_it_only_before_crossing() {
        let sensor = sensor_at_origin();
        // y = 0 のトラックは d = 100 でセンサー中心を横切る
        let mut tr = track(200.0);
        tr.y = 0.0;
        // 仮想光子の交点は d = 105, 95 だが、d > 100 の光子は面から遠ざかる
        let plus = expected_side(&sensor, &tr, &optics(FRAC_PI_4), 1.0).unwrap();
        assert_float_eq!(plus.positions[0], 100.0, abs <= 1e-9);
        assert_float_eq!(plus.positions[1], 95.0, abs <= 1e-9);
        let minus = expected_side(&sensor, &tr, &optics(FRAC_PI_4), -1.0).unwrap();
        assert_float_eq!(minus.path_length(), 5.0, abs <= 1e-9);

        let total = expected_sensor(&sensor, &tr, &optics(FRAC_PI_4));
        assert_float_eq!(total.n, 0.25, abs <= 1e-9);
        // 中点 d = 97.5 から面までの距離は 2.5√2
        let flight = 2.5 * 2.0_f64.sqrt() / PHOTON_VELOCITY;
        assert_float_eq!(total.t, flight + 97.5 / 299.79 + 1.0, abs <= 1e-9);
    }

    #[test]
    fn test_track_starting_on_or_past_sensor_plane_gives_nothing() {
        let sensor = sensor_at_origin();
        for x in [0.0, 10.0, 500.0] {
            let tr = TrackParameters {
                x,
                y: 0.0,
                angle: 0.0,
                length: 3000.0,
                t0: 0.0,
            };
            for ch_angle in [FRAC_PI_4, 0.733] {
                assert_eq!(clipped_track_positions(&tr, &sensor, ch_angle), None);
                let e = expected_sensor(&sensor, &tr, &optics(ch_angle));
                assert_eq!(e.n, 0.0);
                assert_eq!(e.t, 0.0);
            }
        }
    }

    #[test]
    fn test_expected_time_is_midpoint() {
        let sensor = sensor_at_origin();
        let mut tr = track(200.0);
        tr.t0 = 3.0;
        let side = expected_side(&sensor, &tr, &optics(FRAC_PI_4), 1.0).unwrap();
        // 放射位置 d = 45, 55 から面までの距離は 55√2 と 45√2、中点 d = 50 で 50√2
        let flight = 50.0 * 2.0_f64.sqrt() / PHOTON_VELOCITY;
        let expected = flight + 50.0 / 299.79 + 3.0 + 1.0;
        assert_float_eq!(side.expectation.t, expected, abs <= 1e-9);
    }

    #[test]
    fn test_to_event_keeps_mean_time() {
        let sensor = sensor_at_origin();
        let engine = ExpectationEngine::from_layout(
            DetectorLayout {
                modules: vec![crate::models::detector::ModuleLayout {
                    orientation: Orientation::new(0.0, 0.0, FRAC_PI_2),
                    width: 20.0,
                    sensors: vec![sensor],
                }],
                readout_window: 100.0,
            },
            optics(FRAC_PI_4),
        );
        let tr = track(200.0);
        let expectation = engine.evaluate(&tr);
        let event = engine.asimov_event(&tr);
        let e = expectation.get(0, 0).unwrap();
        assert_float_eq!(event.count(0, 0), e.n, abs <= 1e-12);
        assert_float_eq!(event.mean_time(0, 0).unwrap(), e.t, abs <= 1e-9);
    }
}
