//! Writes a link map to stdout when -print-map is given: every output chunk
//! with its address, size and alignment, and under each regular section the
//! input sections that landed in it.

use crate::chunk::Chunk;
use crate::chunk::ChunkKind;
use crate::layout::input_section;
use crate::layout::SectionRef;
use crate::object_file::ObjectFile;
use std::sync::atomic::Ordering::Relaxed;

pub(crate) fn print_map<'ctx, 'data>(
    files: &[ObjectFile<'ctx, 'data>],
    chunks: &[Chunk<'data>],
    members: &[Vec<SectionRef>],
) {
    println!("{:>16} {:>10} {:>6} Out     In", "VMA", "Size", "Align");
    for chunk in chunks {
        if chunk.is_header() {
            continue;
        }
        println!(
            "{:16x} {:10x} {:6} {}",
            chunk.shdr.address,
            chunk.shdr.size,
            chunk.shdr.alignment,
            String::from_utf8_lossy(chunk.name),
        );
        let ChunkKind::Regular(id) = chunk.kind else {
            continue;
        };
        for &section in &members[id.as_usize()] {
            let isec = input_section(files, section);
            let file = &files[section.file as usize];
            println!(
                "{:16x} {:10x} {:6}         {}:({})",
                chunk.shdr.address + isec.offset.load(Relaxed),
                isec.size,
                isec.sh_addralign,
                file,
                String::from_utf8_lossy(isec.name),
            );
        }
    }
}
