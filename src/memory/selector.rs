//! Memory type selection.

use super::types::{MemoryProperties, MemoryPropertyFlags, MemoryTypeIndex};

/// Returns the first memory type whose bit is set in `type_filter` and whose property flags
/// include every flag in `required`, or `None` if no type qualifies.
///
/// First match wins. Heap size and extra flags on the candidate are not considered.
pub fn find_memory_type(
    properties: &MemoryProperties,
    type_filter: u32,
    required: MemoryPropertyFlags,
) -> Option<MemoryTypeIndex> {
    properties
        .indexed_types()
        .find(|(index, ty)| {
            type_filter & (1u32 << index.0) != 0 && ty.property_flags.contains(required)
        })
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;

    fn desktop_properties() -> MemoryProperties {
        MemoryProperties {
            memory_types: vec![
                MemoryType::new(MemoryPropertyFlags::DEVICE_LOCAL, 0),
                MemoryType::new(
                    MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
                    1,
                ),
                MemoryType::new(
                    MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT
                        | MemoryPropertyFlags::HOST_CACHED,
                    1,
                ),
                MemoryType::new(
                    MemoryPropertyFlags::DEVICE_LOCAL
                        | MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT,
                    2,
                ),
            ],
            memory_heaps: Vec::new(),
        }
    }

    #[test]
    fn picks_first_match_in_enumeration_order() {
        let props = desktop_properties();
        let found = find_memory_type(&props, 0b1111, MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(found, Some(MemoryTypeIndex(1)));
    }

    #[test]
    fn respects_type_filter() {
        let props = desktop_properties();
        // Type 1 is masked out, so the cached type is next.
        let found = find_memory_type(&props, 0b1100, MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(found, Some(MemoryTypeIndex(2)));
    }

    #[test]
    fn requires_all_flags() {
        let props = desktop_properties();
        let found = find_memory_type(
            &props,
            u32::MAX,
            MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_VISIBLE,
        );
        assert_eq!(found, Some(MemoryTypeIndex(3)));
    }

    #[test]
    fn empty_filter_finds_nothing() {
        let props = desktop_properties();
        assert_eq!(find_memory_type(&props, 0, MemoryPropertyFlags::empty()), None);
    }

    #[test]
    fn unsatisfiable_flags_find_nothing() {
        let props = desktop_properties();
        assert_eq!(find_memory_type(&props, u32::MAX, MemoryPropertyFlags::PROTECTED), None);
    }

    #[test]
    fn deterministic() {
        let props = desktop_properties();
        let first = find_memory_type(&props, 0b1010, MemoryPropertyFlags::HOST_COHERENT);
        for _ in 0..16 {
            assert_eq!(find_memory_type(&props, 0b1010, MemoryPropertyFlags::HOST_COHERENT), first);
        }
        assert_eq!(first, Some(MemoryTypeIndex(1)));
    }
}
