//! handle_close / handle_duplicate / handle_replace.

use alloc::sync::Arc;

use helion_syscall::{HandleValue, Rights, Status};

use crate::object::handle;
use crate::process::ProcessDispatcher;
use crate::syscall::decode_rights;

pub fn sys_handle_close(up: &Arc<ProcessDispatcher>, value: HandleValue) -> Result<(), Status> {
    // Destruction (cancel + dispatcher release) runs on drop, after the
    // table lock is gone.
    let owner = up
        .remove_handle(value)
        .map_err(|e| up.bad_handle(value, e))?;
    drop(owner);
    Ok(())
}

pub fn sys_handle_duplicate(
    up: &Arc<ProcessDispatcher>,
    value: HandleValue,
    rights_raw: u32,
) -> Result<HandleValue, Status> {
    let rights = decode_rights(rights_raw)?;

    let result = up.with_table_locked(|t| {
        let id = t.lookup(value)?;
        let source_rights = handle::with_handle(id, |h| h.rights()).expect("looked-up handle");

        if !source_rights.covers(Rights::DUPLICATE) {
            return Err(Status::AccessDenied);
        }

        let dup = if rights == Rights::SAME_RIGHTS {
            handle::dup_handle(id, source_rights)?
        } else {
            // A duplicate may only narrow rights; the table is untouched
            // on failure.
            if !source_rights.covers(rights) {
                return Err(Status::InvalidArgs);
            }
            handle::dup_handle(id, rights)?
        };
        Ok(t.add_handle(dup))
    });
    result.map_err(|e| up.bad_handle(value, e))
}

pub fn sys_handle_replace(
    up: &Arc<ProcessDispatcher>,
    value: HandleValue,
    rights_raw: u32,
) -> Result<HandleValue, Status> {
    let rights = decode_rights(rights_raw)?;

    // The removed source must be destroyed outside the table lock, and
    // only when the replacement actually went in.
    let mut retired = None;
    let result = up.with_table_locked(|t| {
        let source = t.remove_handle(value)?;
        let source_rights = source.rights();

        let dup = if rights == Rights::SAME_RIGHTS {
            handle::dup_handle(source.id(), source_rights)
        } else if !source_rights.covers(rights) {
            Err(Status::InvalidArgs)
        } else {
            handle::dup_handle(source.id(), rights)
        };

        match dup {
            Ok(dup) => {
                let new_value = t.add_handle(dup);
                retired = Some(source);
                Ok(new_value)
            }
            Err(e) => {
                // Rollback: the original goes back untouched.
                t.add_handle(source);
                Err(e)
            }
        }
    });
    drop(retired);
    result.map_err(|e| up.bad_handle(value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::event::EventDispatcher;
    use crate::testutil;

    #[test]
    fn duplicate_narrows_but_never_widens() {
        let up = testutil::new_process("dup-test");
        let (event, _) = EventDispatcher::create(0);
        let rights = Rights::DUPLICATE | Rights::READ | Rights::WRITE;
        let hv = up.add_handle(handle::make_handle(event, rights).unwrap());

        // Narrowing works and preserves the original.
        let narrowed = sys_handle_duplicate(&up, hv, (Rights::READ | Rights::WRITE).bits())
            .unwrap();
        let (_, dup_rights) = up.get_dispatcher(narrowed).unwrap();
        assert_eq!(dup_rights, Rights::READ | Rights::WRITE);
        assert_eq!(up.handle_count(), 2);

        // A superset is rejected and the table is unchanged.
        let wider = (Rights::DUPLICATE | Rights::READ | Rights::WRITE | Rights::EXECUTE).bits();
        assert_eq!(
            sys_handle_duplicate(&up, hv, wider),
            Err(Status::InvalidArgs)
        );
        assert_eq!(up.handle_count(), 2);

        // SAME_RIGHTS copies the source mask.
        let same = sys_handle_duplicate(&up, hv, Rights::SAME_RIGHTS.bits()).unwrap();
        let (_, same_rights) = up.get_dispatcher(same).unwrap();
        assert_eq!(same_rights, rights);
    }

    #[test]
    fn duplicate_requires_the_right() {
        let up = testutil::new_process("dup-denied");
        let (event, _) = EventDispatcher::create(0);
        let hv = up.add_handle(handle::make_handle(event, Rights::READ).unwrap());
        assert_eq!(
            sys_handle_duplicate(&up, hv, Rights::READ.bits()),
            Err(Status::AccessDenied)
        );
    }

    #[test]
    fn replace_swaps_value_and_rolls_back() {
        let up = testutil::new_process("replace-test");
        let (event, _) = EventDispatcher::create(0);
        let rights = Rights::DUPLICATE | Rights::READ | Rights::WRITE;
        let hv = up.add_handle(handle::make_handle(event.clone(), rights).unwrap());

        let replaced = sys_handle_replace(&up, hv, Rights::READ.bits()).unwrap();
        assert_ne!(replaced, hv);
        assert_eq!(up.handle_count(), 1);
        // The old value is dead.
        assert_eq!(up.get_dispatcher(hv).unwrap_err(), Status::BadHandle);
        let (d, r) = up.get_dispatcher(replaced).unwrap();
        assert!(Arc::ptr_eq(&d, &event));
        assert_eq!(r, Rights::READ);

        // Widening fails and the handle survives under its current value.
        assert_eq!(
            sys_handle_replace(&up, replaced, rights.bits()),
            Err(Status::InvalidArgs)
        );
        assert!(up.get_dispatcher(replaced).is_ok());
    }

    #[test]
    fn close_unknown_handle_is_bad_handle() {
        let up = testutil::new_process("close-bad");
        assert_eq!(sys_handle_close(&up, 0x55aa55), Err(Status::BadHandle));
    }
}
