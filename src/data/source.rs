//! Pose producers feeding the dispatcher
//!
//! Any `Stream<Item = Result<PoseFrame>>` can drive the pipeline: the stream ending means the
//! video source is exhausted and an `Err` item means capture failed for good.

use std::time::Duration;

use futures::{stream, Stream};
use rand::{thread_rng, Rng};
use tokio::time::{self, MissedTickBehavior};

use super::{LandmarkVector, PoseFrame};
use crate::error::Result;

/// Settings for [`synthetic`]
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    /// Landmarks per detected pose
    pub landmarks: usize,
    /// Frames produced per second
    pub fps: f64,
    /// Stop after this many frames, run forever when `None`
    pub frames: Option<u64>,
    /// Share of frames that carry a detection, in `[0, 1]`
    pub detection_ratio: f64,
}

/// A camera-less producer emitting random poses at a fixed frame rate
pub fn synthetic(source: SyntheticSource) -> impl Stream<Item = Result<PoseFrame>> + Send {
    let mut ticker = time::interval(Duration::from_secs_f64(1.0 / source.fps));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let detection_ratio = source.detection_ratio.clamp(0.0, 1.0);
    let landmarks = source.landmarks;
    let limit = source.frames;

    stream::unfold((ticker, 0u64), move |(mut ticker, produced)| async move {
        if limit.is_some_and(|limit| produced >= limit) {
            return None;
        }

        let timestamp = ticker.tick().await;
        let frame = if thread_rng().gen_bool(detection_ratio) {
            PoseFrame::detected(timestamp, LandmarkVector::fuzz(landmarks))
        } else {
            PoseFrame::empty(timestamp)
        };

        Some((Ok(frame), (ticker, produced + 1)))
    })
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::{synthetic, SyntheticSource};

    #[tokio::test(start_paused = true)]
    async fn stops_after_frame_limit() {
        let frames: Vec<_> = synthetic(SyntheticSource {
            landmarks: 4,
            fps: 60.0,
            frames: Some(10),
            detection_ratio: 1.0,
        })
        .collect()
        .await;

        assert_eq!(frames.len(), 10);
        for frame in frames {
            assert_eq!(frame.unwrap().landmarks.unwrap().len(), 4);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ratio_detects_nothing() {
        let detected = synthetic(SyntheticSource {
            landmarks: 4,
            fps: 120.0,
            frames: Some(20),
            detection_ratio: 0.0,
        })
        .filter(|frame| futures::future::ready(frame.as_ref().unwrap().landmarks.is_some()))
        .count()
        .await;

        assert_eq!(detected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_paced() {
        let frames: Vec<_> = synthetic(SyntheticSource {
            landmarks: 1,
            fps: 10.0,
            frames: Some(3),
            detection_ratio: 1.0,
        })
        .map(|frame| frame.unwrap().timestamp)
        .collect()
        .await;

        assert!(frames[1] - frames[0] >= std::time::Duration::from_millis(99));
        assert!(frames[2] - frames[1] >= std::time::Duration::from_millis(99));
    }
}
