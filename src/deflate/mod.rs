/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Reading and writing DEFLATE streams. Reference streams are read one block at a time with the
//! compressed bits of each block kept so they can be copied into the output unchanged.

pub mod bit_reader;
pub mod bit_writer;
pub mod deflate_constants;
pub mod deflate_reader;
pub mod deflate_token;
pub mod deflate_writer;
pub mod huffman_calc;
pub mod huffman_encoding;
pub mod match_finder;
