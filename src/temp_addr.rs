use rand_core::{OsRng, RngCore};

/// 64-character alphabet for the temp-address discriminator, byte for byte
/// per `qd_router_generate_temp_addr` in the original source.
const ALPHABET: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789+_";

/// Draws 36 random bits and renders them as six 6-bit indices into
/// [`ALPHABET`].
fn discriminator() -> String {
    let random = OsRng.next_u64() & 0xF_FFFF_FFFF; // low 36 bits
    let mut chars = [0u8; 6];
    for (i, slot) in chars.iter_mut().enumerate() {
        let index = (random >> (i * 6)) & 0x3F;
        *slot = ALPHABET[index as usize];
    }
    String::from_utf8(chars.to_vec()).expect("alphabet is pure ASCII")
}

/// Synthesizes a dynamic temporary address of the form
/// `amqp:/_topo/<area>/<router_id>/temp.<6 chars>` (§6, §4.7).
pub fn generate_temp_address(area: &str, router_id: &str) -> String {
    format!("amqp:/_topo/{area}/{router_id}/temp.{}", discriminator())
}
