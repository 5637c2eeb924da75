//! # ringsim
//!
//! 2次元のリングイメージング光検出器のシミュレーションと、
//! 観測イベントからのトラックパラメータ推定のための尤度計算を提供します。
//!
//! - [`models`]: 設計プロパティ、デバイス階層、エミッター、光子、イベント
//! - [`transport`]: モンテカルロ光子輸送（検出段）
//! - [`asimov`]: 決定論的な期待値エンジン
//! - [`likelihood`]: 対数尤度と目的関数
//! - [`scenario`], [`simulation`], [`logging`]: 実行環境

pub mod asimov;
pub mod likelihood;
pub mod logging;
pub mod models;
pub mod scenario;
pub mod simulation;
pub mod transport;
