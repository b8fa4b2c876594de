//! Counter statistics printed at exit when -stat is given.

use crate::chunk::Chunk;
use crate::context::Context;
use crate::object_file::ObjectFile;

pub(crate) fn print(ctx: &Context, files: &[ObjectFile], chunks: &[Chunk], filesize: u64) {
    let num_files = files.iter().filter(|f| f.is_alive()).count();
    let num_input_sections: usize = files
        .iter()
        .filter(|f| f.is_alive())
        .map(|f| f.sections.len())
        .sum();
    println!("files={num_files}");
    println!("input_sections={num_input_sections}");
    println!("output_chunks={}", chunks.len());
    println!("symbols={}", ctx.symbols.len());
    println!("merged_strings={}", ctx.merged.num_pieces());
    println!("filesize={filesize}");
}
