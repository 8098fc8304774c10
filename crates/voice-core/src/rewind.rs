//! Rewind propagation across layers with different sample specs
//!
//! A rewind asks a device to discard up to N already-submitted bytes so they
//! can be re-rendered. Layers rarely share a format, so N is converted at
//! every hop. Conversion rounds up: the master is never asked to rewind less
//! audio than the layer above wanted.

use crate::dispatch::{IoContext, IoCore, Op};
use crate::types::SampleSpec;

/// Convert a byte count between specs, preserving at least its duration
///
/// Partial input frames count as whole frames, and the result is always a
/// whole number of target frames.
pub fn convert_nbytes(nbytes: usize, from: &SampleSpec, to: &SampleSpec) -> usize {
    if nbytes == 0 {
        return 0;
    }
    let from_frame = from.frame_size() as u128;
    let frames = (nbytes as u128).div_ceil(from_frame);
    let to_frames = (frames * to.rate as u128).div_ceil(from.rate as u128);
    (to_frames * to.frame_size() as u128).min(usize::MAX as u128) as usize
}

/// Accept up to the layer's budget and pass it on to the master
///
/// Returns bytes accepted in this layer's format. Zero means nothing was
/// forwarded: empty request, no budget, no master, master detached, or no
/// room left in the deferred queue.
pub fn forward(core: &IoCore, ctx: &mut IoContext<'_>, nbytes: usize) -> usize {
    if nbytes == 0 {
        return 0;
    }
    let Some(master) = core.master else {
        log::debug!("[REWIND] {}: no master, dropping {} bytes", core.name, nbytes);
        return 0;
    };
    if !ctx.is_attached(master.id) {
        log::debug!("[REWIND] {}: master detached, dropping {} bytes", core.name, nbytes);
        return 0;
    }

    let accepted = nbytes.min(core.max_rewind);
    if accepted == 0 {
        return 0;
    }

    let converted = convert_nbytes(accepted, &core.spec, &master.spec);
    log::debug!(
        "[REWIND] {}: {} bytes ({}) -> {} bytes ({}) on {}",
        core.name,
        accepted,
        core.spec,
        converted,
        master.spec,
        master.id
    );
    if !ctx.post(master.id, Op::RequestRewind(converted)) {
        log::warn!("[REWIND] {}: could not forward {} bytes to {}", core.name, accepted, master.id);
        return 0;
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleFormat;

    fn voice() -> SampleSpec {
        SampleSpec::voice_narrowband()
    }

    fn hw() -> SampleSpec {
        SampleSpec::hw_default()
    }

    #[test]
    fn test_known_conversions() {
        // 10 ms at 8k mono s16 = 160 bytes, at 48k stereo s16 = 1920 bytes
        assert_eq!(convert_nbytes(160, &voice(), &hw()), 1920);
        assert_eq!(convert_nbytes(1920, &hw(), &voice()), 160);
        assert_eq!(convert_nbytes(0, &hw(), &voice()), 0);
    }

    #[test]
    fn test_identity() {
        for n in [4, 64, 1920, 4096] {
            assert_eq!(convert_nbytes(n, &hw(), &hw()), n);
        }
    }

    #[test]
    fn test_result_is_frame_aligned() {
        let to = SampleSpec::new(SampleFormat::S24Le, 44_100, 2);
        for n in [1, 7, 333, 1921, 48_000] {
            let out = convert_nbytes(n, &hw(), &to);
            assert_eq!(out % to.frame_size(), 0, "n = {}", n);
        }
    }

    #[test]
    fn test_monotonic() {
        let to = SampleSpec::new(SampleFormat::F32Le, 44_100, 1);
        let mut last = 0;
        for n in (0..20_000).step_by(37) {
            let out = convert_nbytes(n, &hw(), &to);
            assert!(out >= last, "not monotonic at {}", n);
            last = out;
        }
    }

    #[test]
    fn test_never_shortens_duration() {
        let to = SampleSpec::new(SampleFormat::S16Le, 11_025, 1);
        for frames in [1usize, 3, 17, 480, 4801] {
            let n = frames * hw().frame_size();
            let out = convert_nbytes(n, &hw(), &to);
            // Compare durations in exact rational form: frames/rate
            let in_frames = frames as u128;
            let out_frames = (out / to.frame_size()) as u128;
            assert!(
                out_frames * hw().rate as u128 >= in_frames * to.rate as u128,
                "{} frames shortened",
                frames
            );
        }
    }

    #[test]
    fn test_round_trip_through_higher_rate_is_exact() {
        for frames in [1usize, 7, 80, 160, 4001] {
            let n = frames * voice().frame_size();
            let back = convert_nbytes(convert_nbytes(n, &voice(), &hw()), &hw(), &voice());
            assert_eq!(back, n, "frames = {}", frames);
        }
    }

    #[test]
    fn test_round_trip_through_lower_rate_within_one_intermediate_frame() {
        // One 8 kHz frame is exactly six 48 kHz frames
        let one_mid_frame = convert_nbytes(voice().frame_size(), &voice(), &hw());
        assert_eq!(one_mid_frame, 6 * hw().frame_size());

        for frames in [1usize, 5, 6, 7, 479, 480, 4801] {
            let n = frames * hw().frame_size();
            let back = convert_nbytes(convert_nbytes(n, &hw(), &voice()), &voice(), &hw());
            assert!(back >= n);
            assert!(back - n < one_mid_frame, "frames = {}, back = {}", frames, back);
        }
    }

    #[test]
    fn test_round_trip_uneven_rates_bound() {
        // 48000 / 22050 is not whole: the way back may add one more source frame
        let mid = SampleSpec::new(SampleFormat::S16Le, 22_050, 1);
        for frames in [1usize, 10, 441, 960, 4800] {
            let n = frames * hw().frame_size();
            let back = convert_nbytes(convert_nbytes(n, &hw(), &mid), &mid, &hw());
            assert!(back >= n);
            // extra < one mid frame + one source frame, in exact rational form
            let extra = ((back - n) / hw().frame_size()) as u128;
            assert!(
                extra * (mid.rate as u128) < hw().rate as u128 + mid.rate as u128,
                "frames = {}, back = {}",
                frames,
                back
            );
        }
    }
}
