// SPIR-V patching
//
// Some hardware cannot read storage images without an explicit format
// (observed with the 4x8-bit BGRA layouts). When the capability is
// missing the compiled shader must decorate the binding NonReadable
// before pipeline creation. The patch is a pure function over the
// binary so it stays independently testable; it validates everything
// and fails closed by producing no patch.

const SPIRV_MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;

const OP_DECORATE: u32 = 71;
const DECORATION_BINDING: u32 = 33;
const DECORATION_NON_READABLE: u32 = 25;

/// Splices an `OpDecorate <id> NonReadable` immediately after the
/// existing `OpDecorate <id> Binding <binding>` annotation.
///
/// Returns `None` ("no patch produced") when:
/// - the header magic or word alignment is invalid,
/// - the binding annotation cannot be located,
/// - the binding is already decorated NonReadable (idempotence).
pub(crate) fn patch_nonreadable(bytes: &[u8], binding: u32) -> Option<Vec<u8>> {
    if bytes.len() < HEADER_WORDS * 4 || bytes.len() % 4 != 0 {
        return None;
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return None;
    }

    // One scan: locate the Binding annotation for the target slot and
    // check whether its id already carries NonReadable. Instruction
    // word counts live in the high 16 bits; a zero count would loop
    // forever, so it aborts the scan.
    let mut target_id = None;
    let mut insert_at = None;
    let mut i = HEADER_WORDS;
    while i < words.len() {
        let word_count = (words[i] >> 16) as usize;
        let opcode = words[i] & 0xffff;
        if word_count == 0 || i + word_count > words.len() {
            return None;
        }
        if opcode == OP_DECORATE
            && word_count == 4
            && words[i + 2] == DECORATION_BINDING
            && words[i + 3] == binding
        {
            target_id = Some(words[i + 1]);
            insert_at = Some(i + word_count);
        }
        i += word_count;
    }

    let target_id = target_id?;
    let insert_at = insert_at?;

    // Second pass only over annotations: is the id already marked?
    let mut i = HEADER_WORDS;
    while i < words.len() {
        let word_count = (words[i] >> 16) as usize;
        let opcode = words[i] & 0xffff;
        if opcode == OP_DECORATE
            && word_count == 3
            && words[i + 1] == target_id
            && words[i + 2] == DECORATION_NON_READABLE
        {
            return None;
        }
        i += word_count;
    }

    let mut patched = Vec::with_capacity(words.len() + 3);
    patched.extend_from_slice(&words[..insert_at]);
    patched.push(OP_DECORATE | (3 << 16));
    patched.push(target_id);
    patched.push(DECORATION_NON_READABLE);
    patched.extend_from_slice(&words[insert_at..]);

    let mut out = Vec::with_capacity(patched.len() * 4);
    for word in patched {
        out.extend_from_slice(&word.to_ne_bytes());
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    fn header() -> Vec<u32> {
        vec![SPIRV_MAGIC, 0x0001_0000, 0, 8, 0]
    }

    fn decorate_binding(id: u32, binding: u32) -> Vec<u32> {
        vec![OP_DECORATE | (4 << 16), id, DECORATION_BINDING, binding]
    }

    fn decorate_nonreadable(id: u32) -> Vec<u32> {
        vec![OP_DECORATE | (3 << 16), id, DECORATION_NON_READABLE]
    }

    #[test]
    fn patches_after_the_binding_annotation() {
        let mut module = header();
        module.extend(decorate_binding(7, 2048));
        // Trailing instruction so the splice position matters.
        module.extend(decorate_binding(9, 2049));

        let patched = patch_nonreadable(&words_to_bytes(&module), 2048).unwrap();
        let mut expected = header();
        expected.extend(decorate_binding(7, 2048));
        expected.extend(decorate_nonreadable(7));
        expected.extend(decorate_binding(9, 2049));
        assert_eq!(patched, words_to_bytes(&expected));
    }

    #[test]
    fn already_decorated_is_a_no_op() {
        let mut module = header();
        module.extend(decorate_binding(7, 2048));
        module.extend(decorate_nonreadable(7));
        assert!(patch_nonreadable(&words_to_bytes(&module), 2048).is_none());
    }

    #[test]
    fn patching_twice_never_duplicates() {
        let mut module = header();
        module.extend(decorate_binding(7, 2048));
        let once = patch_nonreadable(&words_to_bytes(&module), 2048).unwrap();
        assert!(patch_nonreadable(&once, 2048).is_none());
    }

    #[test]
    fn missing_binding_fails_closed() {
        let mut module = header();
        module.extend(decorate_binding(7, 1024));
        assert!(patch_nonreadable(&words_to_bytes(&module), 2048).is_none());
    }

    #[test]
    fn bad_magic_fails_closed() {
        let mut module = header();
        module[0] = 0xdead_beef;
        module.extend(decorate_binding(7, 2048));
        assert!(patch_nonreadable(&words_to_bytes(&module), 2048).is_none());
    }

    #[test]
    fn misaligned_or_short_input_fails_closed() {
        let module = words_to_bytes(&header());
        assert!(patch_nonreadable(&module[..module.len() - 1], 2048).is_none());
        assert!(patch_nonreadable(&module[..8], 2048).is_none());
    }

    #[test]
    fn truncated_instruction_never_reads_past_the_end() {
        let mut module = header();
        // Claims 4 words but only 2 remain.
        module.extend([OP_DECORATE | (4 << 16), 7]);
        assert!(patch_nonreadable(&words_to_bytes(&module), 2048).is_none());
    }

    #[test]
    fn zero_word_count_aborts() {
        let mut module = header();
        module.push(0); // opcode 0, word count 0
        assert!(patch_nonreadable(&words_to_bytes(&module), 2048).is_none());
    }
}
