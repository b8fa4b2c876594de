//! Symbol resolution. Three sub-phases, each a barrier: every file registers
//! its definitions under the dominance order; archive members referenced by
//! live files are pulled in by a fed, work-stealing traversal; weak symbols
//! that stayed undefined are bound to absolute zero.

use crate::error::Result;
use crate::object_file::ObjectFile;
use rayon::prelude::*;

#[tracing::instrument(skip_all, name = "Resolve symbols")]
pub(crate) fn resolve_symbols<'ctx, 'data>(files: &[ObjectFile<'ctx, 'data>]) -> Result {
    // Register definitions. Archive members that aren't alive yet register
    // at lazy rank; everything they own can still be taken over later.
    files
        .par_iter()
        .try_for_each(|file| file.register_symbols(files))?;

    mark_live_archive_members(files);

    // Members that became live re-rank their definitions as live ones. Doing
    // this after the traversal, rather than during it, keeps the set of
    // loaded members independent of traversal order.
    files.par_iter().try_for_each(|file| {
        if file.is_alive() && file.is_in_archive {
            file.register_symbols(files)
        } else {
            Ok(())
        }
    })?;

    // Weak undefined symbols become absolute zero.
    files.par_iter().for_each(|file| {
        if file.is_alive() {
            file.handle_undefined_weak_symbols();
        }
    });

    // Anything still undefined and non-weak is a link error.
    files.par_iter().try_for_each(|file| {
        if file.is_alive() {
            file.check_undefined_symbols()
        } else {
            Ok(())
        }
    })
}

/// Starting from the live non-shared files, repeatedly pulls in the archive
/// members that undefined references resolve to. Newly activated members are
/// fed back into the traversal; each file is processed at most once because
/// only the thread that wins the alive flag processes it.
#[tracing::instrument(skip_all, name = "Mark live archive members")]
fn mark_live_archive_members<'ctx, 'data>(files: &[ObjectFile<'ctx, 'data>]) {
    rayon::scope(|scope| {
        for file in files {
            if file.is_alive() && !file.is_dso {
                scope.spawn(move |scope| visit(file, files, scope));
            }
        }
    });
}

fn visit<'scope, 'ctx: 'scope, 'data: 'scope>(
    file: &'scope ObjectFile<'ctx, 'data>,
    files: &'scope [ObjectFile<'ctx, 'data>],
    scope: &rayon::Scope<'scope>,
) {
    file.for_each_required_file(|file_index| {
        let target = &files[file_index as usize];
        if target.is_in_archive && target.activate() {
            scope.spawn(move |scope| visit(target, files, scope));
        }
    });
}
