//! Safe wrapper around libpq for the two connection roles the bridge needs:
//! a plain autocommit connection for catalog queries, and a
//! `replication=database` connection for slot administration and streaming.

use crate::errors::{Error, Result};
use libpq_sys::*;
use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::ptr;

/// SQLSTATE diagnostic field code, per libpq-fe.h `PG_DIAG_SQLSTATE`.
const PG_DIAG_SQLSTATE: c_int = b'C' as c_int;

pub struct Connection {
    conn: *mut PGconn,
}

// The connection is only ever touched from the single thread that owns the
// session; Send lets it cross the spawn_blocking boundary from async main.
unsafe impl Send for Connection {}

impl Connection {
    pub fn connect(conninfo: &str) -> Result<Self> {
        let c_conninfo = CString::new(conninfo)?;
        let conn = unsafe { PQconnectdb(c_conninfo.as_ptr()) };

        if conn.is_null() {
            return Err(Error::connection("failed to allocate connection object"));
        }

        if unsafe { PQstatus(conn) } != ConnStatusType::CONNECTION_OK {
            let msg = error_message(conn).unwrap_or_else(|| "unknown error".to_string());
            unsafe { PQfinish(conn) };
            return Err(Error::connection(msg));
        }

        Ok(Self { conn })
    }

    pub fn exec(&self, query: &str) -> Result<QueryResult> {
        let c_query = CString::new(query)?;
        let result = unsafe { PQexec(self.conn, c_query.as_ptr()) };

        if result.is_null() {
            let msg = error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
            return Err(Error::connection(msg));
        }

        Ok(QueryResult { result })
    }

    /// Blocking read of the next row of COPY data. `None` means the COPY is
    /// done (the caller should not call this again).
    pub fn get_copy_data(&self) -> Result<Option<Vec<u8>>> {
        let mut buffer: *mut std::os::raw::c_char = ptr::null_mut();
        let len = unsafe { PQgetCopyData(self.conn, &mut buffer, 0) };

        match len {
            -2 => Err(Error::protocol(
                error_message(self.conn).unwrap_or_else(|| "unknown error".to_string()),
            )),
            -1 => Ok(None),
            0 => Ok(None), // only possible in async mode, which we never request
            len => {
                if buffer.is_null() {
                    return Err(Error::protocol("PQgetCopyData returned a null buffer"));
                }
                let data =
                    unsafe { std::slice::from_raw_parts(buffer as *const u8, len as usize) }
                        .to_vec();
                unsafe { PQfreemem(buffer as *mut std::os::raw::c_void) };
                Ok(Some(data))
            }
        }
    }

    pub fn put_copy_data(&self, data: &[u8]) -> Result<()> {
        let result = unsafe {
            PQputCopyData(
                self.conn,
                data.as_ptr() as *const std::os::raw::c_char,
                data.len() as c_int,
            )
        };
        if result != 1 {
            return Err(Error::protocol(
                error_message(self.conn).unwrap_or_else(|| "failed to send copy data".to_string()),
            ));
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        if unsafe { PQflush(self.conn) } != 0 {
            return Err(Error::protocol("failed to flush connection"));
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.conn.is_null() {
            unsafe { PQfinish(self.conn) };
        }
    }
}

fn error_message(conn: *const PGconn) -> Option<String> {
    unsafe {
        let ptr = PQerrorMessage(conn);
        if ptr.is_null() {
            None
        } else {
            Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    }
}

/// Safe wrapper around a `PGresult`. Freed on drop regardless of status, so
/// callers can inspect an error result (including its SQLSTATE) before it
/// goes away.
pub struct QueryResult {
    result: *mut PGresult,
}

impl QueryResult {
    pub fn status(&self) -> ExecStatusType {
        unsafe { PQresultStatus(self.result) }
    }

    pub fn is_ok(&self) -> bool {
        matches!(
            self.status(),
            ExecStatusType::PGRES_TUPLES_OK
                | ExecStatusType::PGRES_COMMAND_OK
                | ExecStatusType::PGRES_COPY_BOTH
        )
    }

    pub fn sqlstate(&self) -> Option<String> {
        unsafe {
            let ptr = PQresultErrorField(self.result, PG_DIAG_SQLSTATE);
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }

    pub fn error_message(&self) -> Option<String> {
        unsafe {
            let ptr = PQresultErrorMessage(self.result);
            if ptr.is_null() || *ptr == 0 {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }

    pub fn ntuples(&self) -> i32 {
        unsafe { PQntuples(self.result) }
    }

    pub fn getvalue(&self, row: i32, col: i32) -> Option<String> {
        let ptr = unsafe { PQgetvalue(self.result, row, col) };
        if ptr.is_null() {
            None
        } else {
            unsafe { Some(CStr::from_ptr(ptr).to_string_lossy().into_owned()) }
        }
    }
}

impl Drop for QueryResult {
    fn drop(&mut self) {
        if !self.result.is_null() {
            unsafe { PQclear(self.result) };
        }
    }
}
