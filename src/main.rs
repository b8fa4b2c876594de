mod archive;
mod args;
mod chunk;
mod comdat;
mod context;
mod elf;
mod elf_writer;
mod error;
mod file_kind;
mod hash;
mod input_data;
mod layout;
mod map_file;
mod merge;
mod object_file;
mod output_sections;
mod resolution;
mod scan;
mod stats;
mod symbol;

use crate::error::Result;
use crate::object_file::ObjectFile;
use rayon::prelude::*;

fn main() -> Result {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = args::from_env()?;
    args.setup_thread_pool()?;
    link(&args)
}

/// The pipeline: a strictly ordered sequence of data-parallel phases. Each
/// phase reads the outputs of earlier ones and writes its own; the rayon
/// joins between them are the barriers.
#[tracing::instrument(skip_all, name = "Link")]
fn link(args: &args::Args) -> Result {
    let input_data = input_data::InputData::from_args(args)?;
    let inputs = input_data.split_inputs()?;
    let ctx = context::Context::new(args);

    // Parse every input. A file's position in this list determines its
    // priority: primary files first in command-line order, then archive
    // members, then (appended later) the internal file.
    let parse_span = tracing::span!(tracing::Level::INFO, "Parse input files");
    let mut files: Vec<ObjectFile> = {
        let _scope = parse_span.enter();
        inputs
            .into_par_iter()
            .enumerate()
            .map(|(index, input)| ObjectFile::parse(input, index as u32 + 1, &ctx))
            .collect::<Result<Vec<ObjectFile>>>()?
    };

    // Decide which file defines each symbol and which archive members take
    // part in the link.
    resolution::resolve_symbols(&files)?;

    if args.trace_files {
        for file in files.iter().filter(|f| f.is_alive()) {
            println!("{file}");
        }
    }

    // Remove duplicate COMDAT groups.
    eliminate_comdats(&ctx, &mut files);

    // Merge string constants from SHF_MERGE|SHF_STRINGS sections.
    let merged_sizes = merge::coalesce_strings(&mut files, ctx.merged.len());

    // Give common symbols backing storage in .bss.
    convert_common_symbols(&ctx, &mut files);

    // Bin input sections into output sections and lay each section out.
    let num_sections = ctx.sections.len();
    let members = layout::bin_sections(&files, num_sections);
    let (section_sizes, section_aligns) = layout::set_isec_offsets(&files, &members);
    let section_keys = ctx.sections.keys();
    let merged_keys = ctx.merged.keys();
    let section_chunks = layout::build_section_chunks(
        &section_keys,
        &section_sizes,
        &section_aligns,
        &merged_keys,
        &merged_sizes,
    );

    // The internal file supplies the linker-synthesized symbols. It gets the
    // highest priority value so user definitions always win.
    let section_names = layout::section_names(&section_chunks);
    let internal = ObjectFile::internal(&ctx, files.len() as u32 + 1, &section_names);
    internal.register_symbols(&files)?;
    files.push(internal);

    // Beyond this point no new symbols are added.

    // Size the synthetic tables from the relocations.
    scan::scan_relocations(&files)?;
    scan::assign_slots(&mut files, args.is_static)?;
    let tables = scan::assign_table_offsets(&mut files);

    // Symbol table sizes have to be final before the writer runs; its
    // prefix sums are checked against them.
    compute_symtab(&mut files);
    let num_locals: u64 = files.iter().map(|f| f.num_local_symtab).sum();
    let num_globals: u64 = files.iter().map(|f| f.num_global_symtab).sum();
    let strtab_size = 1 + files
        .iter()
        .map(|f| f.local_strtab_size + f.global_strtab_size)
        .sum::<u64>();

    // Assemble the master chunk list and assign file offsets and addresses.
    let (mut chunks, shstrtab) = layout::finalize_chunks(
        section_chunks,
        &tables,
        &ctx,
        num_locals,
        num_globals,
        strtab_size,
    );
    let filesize = layout::assign_chunk_offsets(&mut chunks);

    // Layout is fixed; symbol addresses get their final values.
    layout::fix_synthetic_symbols(&ctx, &chunks, files.last().unwrap());
    let addrs = layout::section_addrs(&chunks, num_sections, ctx.merged.len());
    fix_addresses(&mut files, &addrs);
    let phdrs = chunk::build_program_headers(&chunks);

    // Write everything.
    let mut output = elf_writer::Output::create(&args.output, filesize, args.filler)?;
    output.write(&elf_writer::WriteCx {
        ctx: &ctx,
        files: &files,
        chunks: &chunks,
        members: &members,
        tables: &tables,
        addrs: &addrs,
        shstrtab: &shstrtab,
        phdrs: &phdrs,
        filesize,
    })?;
    drop(output);

    if args.print_map {
        map_file::print_map(&files, &chunks, &members);
    }
    if args.print_stats {
        stats::print(&ctx, &files, &chunks, filesize);
    }
    Ok(())
}

#[tracing::instrument(skip_all, name = "Eliminate COMDAT groups")]
fn eliminate_comdats<'ctx, 'data>(
    ctx: &'ctx context::Context<'data>,
    files: &mut [ObjectFile<'ctx, 'data>],
) {
    files.par_iter().for_each(|file| {
        if file.is_alive() {
            file.claim_comdat_groups(ctx);
        }
    });
    files.par_iter_mut().for_each(|file| {
        if file.is_alive() {
            file.prune_comdat_groups(ctx);
        }
    });
}

#[tracing::instrument(skip_all, name = "Convert common symbols")]
fn convert_common_symbols<'ctx, 'data>(
    ctx: &'ctx context::Context<'data>,
    files: &mut [ObjectFile<'ctx, 'data>],
) {
    files.par_iter_mut().for_each(|file| {
        if file.is_alive() {
            file.convert_common_symbols(ctx);
        }
    });
}

#[tracing::instrument(skip_all, name = "Compute symtab sizes")]
fn compute_symtab<'ctx, 'data>(files: &mut [ObjectFile<'ctx, 'data>]) {
    files.par_iter_mut().for_each(|file| file.compute_symtab());
}

#[tracing::instrument(skip_all, name = "Fix symbol addresses")]
fn fix_addresses<'ctx, 'data>(
    files: &mut [ObjectFile<'ctx, 'data>],
    addrs: &crate::object_file::SectionAddrs,
) {
    files.par_iter_mut().for_each(|file| {
        if file.is_alive() {
            file.fix_addresses(addrs);
        }
    });
}
