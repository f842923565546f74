//! Port arithmetic shared by probing and prediction
//!
//! Ports live in a cyclic field: a NAT that runs off the top of its range
//! starts again at the bottom, so distances and offsets wrap.

use crate::error::{Result, RiftError};
use crate::nat::{MAX_PORT, PRIVILEGED_PORT_CEILING, PortRange, SAFE_PORT_FLOOR};
use rand::Rng;

/// Shortest distance between two values in a cyclic field of size `field`
///
/// The result is negative when `x` is the smaller of the two, so callers
/// that only care about magnitude take the absolute value.
#[must_use]
pub fn field_dist(x: i64, y: i64, field: i64) -> i64 {
    let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
    let direct = hi - lo;
    if direct == 0 {
        return 0;
    }
    let wrapped = lo + (field - hi);
    let dist = direct.min(wrapped);
    if x == lo { -dist } else { dist }
}

/// Absolute port distance in the 16-bit port field
#[must_use]
pub fn port_field_dist(x: u16, y: u16) -> u32 {
    field_dist(i64::from(x), i64::from(y), i64::from(MAX_PORT)).unsigned_abs() as u32
}

/// Wrap an arbitrary offset into `range`
#[must_use]
pub fn field_wrap(n: i64, range: PortRange) -> u16 {
    let lo = i64::from(range.min());
    let size = i64::from(range.span()) + 1;
    let wrapped = lo + (n - lo).rem_euclid(size);
    // wrapped is within [min, max] so the cast cannot truncate
    wrapped as u16
}

/// Wrap an offset into the port space, never yielding zero
#[must_use]
pub fn port_wrap(n: i64) -> u16 {
    match n.rem_euclid(i64::from(MAX_PORT)) {
        0 => 1,
        port => port as u16,
    }
}

/// Absolute linear distance between two ports
#[must_use]
pub const fn port_distance(x: u16, y: u16) -> u16 {
    x.abs_diff(y)
}

/// Uniformly random port inside `range`
pub fn random_port<R: Rng + ?Sized>(range: PortRange, rng: &mut R) -> u16 {
    rng.gen_range(range.min()..=range.max())
}

/// Port range usable by both peers
///
/// Takes the overlap of both ranges when it holds at least `count` ports,
/// otherwise falls back to `ours`. A lower bound in the privileged range is
/// raised to [`SAFE_PORT_FLOOR`].
///
/// # Errors
///
/// Returns `CannotPredict` when raising the lower bound leaves no ports.
pub fn usable_range(ours: PortRange, theirs: PortRange, count: usize) -> Result<PortRange> {
    let chosen = match ours.overlap(&theirs) {
        Some(overlap) if usize::from(overlap.span()) >= count => overlap,
        _ => ours,
    };

    if chosen.min() > PRIVILEGED_PORT_CEILING {
        return Ok(chosen);
    }
    if SAFE_PORT_FLOOR >= chosen.max() {
        return Err(RiftError::CannotPredict(
            format!("port range {chosen} has no unprivileged ports").into(),
        ));
    }
    PortRange::new(SAFE_PORT_FLOOR, chosen.max())
}
