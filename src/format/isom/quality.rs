use super::channel::Channel;
use super::container::{Container, ReferenceKind};
use log::debug;

/// Direction of a scalable-layer switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchDirection {
    Up,
    Down,
}

/// Resolves the track a channel should move to for a layer switch.
///
/// The anchor is the channel's pending next track, or its current track.
/// Any unresolvable step returns the anchor unchanged. The channel itself is
/// not modified: callers store the result as the channel's next track.
pub fn switch_quality<C: Container + ?Sized>(
    channel: &Channel,
    container: &mut C,
    direction: SwitchDirection,
) -> u32 {
    let current = if channel.next_track() != 0 {
        channel.next_track()
    } else {
        channel.track()
    };

    let next = match direction {
        SwitchDirection::Up => match next_layer_up(container, current) {
            Some(track) => track,
            None => return current,
        },
        SwitchDirection::Down => {
            if current == channel.base_track() {
                return current;
            }
            match next_layer_down(container, current) {
                Some(track) => track,
                None => return current,
            }
        }
    };

    debug!(
        "[IsoMedia] Quality switch {:?}: track {} -> track {}",
        direction, current, next
    );
    channel.apply_extract_mode(container, next);
    next
}

// The next layer up is the track whose last scalable reference points to `current`.
fn next_layer_up<C: Container + ?Sized>(container: &C, current: u32) -> Option<u32> {
    let track_id = container.track_id(current);
    for track in 1..=container.track_count() {
        let count = container.reference_count(track, ReferenceKind::Scalable).ok()?;
        if count == 0 {
            continue;
        }
        if count == container.has_track_reference(track, ReferenceKind::Scalable, track_id) {
            return Some(track);
        }
    }
    None
}

fn next_layer_down<C: Container + ?Sized>(container: &C, current: u32) -> Option<u32> {
    let count = container
        .reference_count(current, ReferenceKind::Scalable)
        .ok()
        .filter(|count| *count > 0)?;
    container
        .reference(current, ReferenceKind::Scalable, count)
        .filter(|track| *track != 0)
}
